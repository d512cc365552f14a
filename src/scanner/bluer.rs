//! BlueZ D-Bus discovery backend.
//!
//! This backend uses the `bluer` crate to communicate with the BlueZ daemon
//! via D-Bus. It requires the `bluetoothd` daemon to be running.
//!
//! BlueZ first reports every device it remembers, in range or not. Only
//! devices with an RSSI have advertised since discovery started; a
//! remembered device that wakes up is reported again when its RSSI changes.

use super::{DiscoveredDevice, Discovery, ScanError};
use bluer::{Adapter, AdapterEvent, Session};
use futures::StreamExt;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use tracing::info;

impl From<bluer::Error> for ScanError {
    fn from(err: bluer::Error) -> Self {
        ScanError::Bluetooth(err.to_string())
    }
}

/// Active discovery on the default adapter.
///
/// Holds the D-Bus session; the adapter handle can be shared with the GATT
/// connector via [`BluerDiscovery::adapter`].
pub struct BluerDiscovery {
    _session: Session,
    adapter: Adapter,
}

impl BluerDiscovery {
    /// Open the default adapter and power it on.
    pub async fn open() -> Result<Self, ScanError> {
        let session = Session::new().await?;
        let adapter = session.default_adapter().await?;
        adapter.set_powered(true).await?;
        info!(adapter = adapter.name(), "Bluetooth adapter ready");
        Ok(Self {
            _session: session,
            adapter,
        })
    }

    pub fn adapter(&self) -> Adapter {
        self.adapter.clone()
    }
}

impl Discovery for BluerDiscovery {
    fn discover(&self) -> BoxFuture<'_, Result<BoxStream<'static, DiscoveredDevice>, ScanError>> {
        Box::pin(async move {
            let events = self.adapter.discover_devices_with_changes().await?;
            let adapter = self.adapter.clone();

            let devices = events.filter_map(move |event| {
                let adapter = adapter.clone();
                async move {
                    let AdapterEvent::DeviceAdded(address) = event else {
                        return None;
                    };
                    let rssi = match adapter.device(address) {
                        Ok(device) => device.rssi().await.ok().flatten(),
                        Err(_) => None,
                    };
                    Some(DiscoveredDevice {
                        address: address.into(),
                        rssi,
                    })
                }
            });
            Ok(devices.boxed())
        })
    }
}
