//! Device discovery for allowlisted scales.
//!
//! A scan cycle listens for advertisements for a bounded time and stops at
//! the first allowlisted address. [`Scanner`] repeats cycles, keeps track of
//! targets whose last session failed, and backs off once every target has
//! failed.

#[cfg(feature = "bluer")]
pub mod bluer;

use crate::allowlist::TargetAllowlist;
use crate::mac_address::MacAddress;
use crate::shutdown::Shutdown;
use futures::StreamExt;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use std::collections::BTreeSet;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Error type for scanner operations.
#[derive(Error, Debug)]
pub enum ScanError {
    /// Bluetooth/adapter related error
    #[error("Bluetooth error: {0}")]
    Bluetooth(String),
}

/// A device reported during a scan cycle.
///
/// Backends may also report devices they only remember from earlier scans;
/// those carry no RSSI and are never matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveredDevice {
    pub address: MacAddress,
    pub rssi: Option<i16>,
}

impl DiscoveredDevice {
    /// True when the device advertised during this cycle.
    pub fn is_in_range(&self) -> bool {
        self.rssi.is_some()
    }
}

/// Source of advertisements. Dropping the returned stream stops discovery.
pub trait Discovery: Send + Sync {
    fn discover(&self) -> BoxFuture<'_, Result<BoxStream<'static, DiscoveredDevice>, ScanError>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanConfig {
    /// Length of one scan cycle.
    pub scan_timeout: Duration,
    /// Pause after a cycle without a match.
    pub cycle_pause: Duration,
    /// Pause once every target has failed.
    pub failure_pause: Duration,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            scan_timeout: Duration::from_secs(3),
            cycle_pause: Duration::from_secs(1),
            failure_pause: Duration::from_secs(5),
        }
    }
}

/// Run one bounded scan cycle, returning the first allowlisted device that
/// advertised during the cycle.
pub async fn scan_cycle(
    discovery: &dyn Discovery,
    targets: &TargetAllowlist,
    timeout: Duration,
) -> Result<Option<DiscoveredDevice>, ScanError> {
    let mut devices = discovery.discover().await?;

    let search = async {
        while let Some(device) = devices.next().await {
            let address = device.address.normalized();
            if !targets.contains(&device.address) {
                debug!(%address, rssi = ?device.rssi, "ignoring device");
            } else if !device.is_in_range() {
                debug!(%address, "target known but not advertising");
            } else {
                return Some(device);
            }
        }
        None
    };

    Ok(tokio::time::timeout(timeout, search).await.unwrap_or(None))
}

pub struct Scanner {
    discovery: Box<dyn Discovery>,
    targets: TargetAllowlist,
    failed: BTreeSet<MacAddress>,
    config: ScanConfig,
}

impl Scanner {
    pub fn new(
        discovery: Box<dyn Discovery>,
        targets: TargetAllowlist,
        config: ScanConfig,
    ) -> Self {
        Self {
            discovery,
            targets,
            failed: BTreeSet::new(),
            config,
        }
    }

    pub fn targets(&self) -> &TargetAllowlist {
        &self.targets
    }

    /// Targets currently excluded from matching.
    pub fn failed(&self) -> &BTreeSet<MacAddress> {
        &self.failed
    }

    pub fn record_success(&mut self, address: MacAddress) {
        debug!(address = %address.normalized(), "session succeeded");
        self.failed.clear();
    }

    pub fn record_failure(&mut self, address: MacAddress) {
        self.failed.insert(address);
    }

    /// Scan until an eligible target shows up.
    ///
    /// Returns `None` once shutdown is requested. Scan errors are logged and
    /// the cycle is retried after the regular pause.
    pub async fn next_target(&mut self, shutdown: &mut Shutdown) -> Option<DiscoveredDevice> {
        loop {
            if shutdown.is_triggered() {
                return None;
            }

            if self.targets.is_covered_by(&self.failed) {
                warn!(
                    targets = self.targets.len(),
                    pause = ?self.config.failure_pause,
                    "all target devices failed, backing off"
                );
                if !shutdown.pause(self.config.failure_pause).await {
                    return None;
                }
                self.failed.clear();
            }

            let candidates = self.targets.without(&self.failed);
            debug!(candidates = candidates.len(), "scan cycle");
            let cycle = scan_cycle(self.discovery.as_ref(), &candidates, self.config.scan_timeout);
            let result = tokio::select! {
                result = cycle => result,
                _ = shutdown.triggered() => return None,
            };

            match result {
                Ok(Some(device)) => {
                    info!(
                        address = %device.address.normalized(),
                        rssi = ?device.rssi,
                        "found target device"
                    );
                    return Some(device);
                }
                Ok(None) => debug!("no target device seen"),
                Err(err) => warn!(%err, "scan failed"),
            }

            if !shutdown.pause(self.config.cycle_pause).await {
                return None;
            }
        }
    }
}
