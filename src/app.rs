//! Core application runner for `bs440-listener`.
//!
//! This module is intentionally decoupled from CLI parsing, logging setup and
//! process exit codes so it can be tested deterministically with an injected
//! Bluetooth stack and injected sinks.

use crate::allowlist::TargetAllowlist;
use crate::mac_address::MacAddress;
use crate::output::Format;
use crate::output::json::DEFAULT_TOPIC_PREFIX;
use crate::scanner::{Discovery, ScanConfig, ScanError, Scanner};
use crate::session::{Connector, SessionConfig, SessionError, SessionManager};
use crate::shutdown::Shutdown;
use crate::sink::{Dispatcher, MqttSettings, Sink, SinkSettings, SinkSpec, parse_sink};
use clap::Parser;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Listen for Medisana BS440-family scales and publish their measurements.
#[derive(Parser, Debug, Clone)]
#[command(author, about, version)]
pub struct Options {
    /// Address of a scale to collect from. Repeat for several scales.
    /// Format: --device F1:37:57:6C:DE:2F
    #[arg(long = "device", value_name = "ADDRESS", required = true)]
    pub devices: Vec<MacAddress>,

    /// Where to publish measurements: `stdout`, `udp://HOST:PORT` or
    /// `mqtt://HOST[:PORT]`. Repeat for several sinks; they are served in
    /// the given order.
    #[arg(long = "sink", value_name = "SINK", value_parser = parse_sink, default_value = "stdout")]
    pub sinks: Vec<SinkSpec>,

    /// Line format used by the sinks.
    #[arg(long, default_value_t, value_enum)]
    pub format: Format,

    /// The name of the measurement in InfluxDB line protocol.
    #[arg(long, default_value = "body_composition")]
    pub influxdb_measurement: String,

    /// Topic prefix for the JSON format and MQTT sinks.
    #[arg(long, default_value = DEFAULT_TOPIC_PREFIX)]
    pub topic_prefix: String,

    /// MQTT client identifier.
    #[arg(long, default_value = "bs440-listener")]
    pub mqtt_client_id: String,

    /// MQTT username; only used together with --mqtt-password.
    #[arg(long, env = "MQTT_USERNAME")]
    pub mqtt_username: Option<String>,

    /// MQTT password.
    #[arg(long, env = "MQTT_PASSWORD", hide_env_values = true)]
    pub mqtt_password: Option<String>,

    /// MQTT quality of service level.
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=2), default_value_t = 0)]
    pub mqtt_qos: u8,

    /// Publish MQTT messages with the retain flag.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub mqtt_retain: bool,

    /// Length of one scan cycle.
    /// Accepts duration with suffix: 3s, 1m, 500ms, 2h.
    #[arg(long, value_parser = crate::duration::parse_duration, default_value = "3s")]
    pub scan_timeout: Duration,

    /// How long to collect measurements after connecting.
    #[arg(long, value_parser = crate::duration::parse_duration, default_value = "30s")]
    pub collect_window: Duration,

    /// Connection attempts per discovered scale.
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..), default_value_t = 3)]
    pub connect_attempts: u32,

    /// Pause between connection attempts.
    #[arg(long, value_parser = crate::duration::parse_duration, default_value = "1s")]
    pub retry_backoff: Duration,

    /// Pause between scan cycles that found nothing.
    #[arg(long, value_parser = crate::duration::parse_duration, default_value = "1s")]
    pub scan_pause: Duration,

    /// Pause once every configured scale has failed.
    #[arg(long, value_parser = crate::duration::parse_duration, default_value = "5s")]
    pub failure_pause: Duration,

    /// Verbose output, log protocol traffic and ignored devices
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}

impl Options {
    pub fn allowlist(&self) -> TargetAllowlist {
        TargetAllowlist::new(self.devices.iter().copied())
    }

    pub fn scan_config(&self) -> ScanConfig {
        ScanConfig {
            scan_timeout: self.scan_timeout,
            cycle_pause: self.scan_pause,
            failure_pause: self.failure_pause,
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            connect_attempts: self.connect_attempts,
            retry_backoff: self.retry_backoff,
            collect_window: self.collect_window,
            ..SessionConfig::default()
        }
    }

    pub fn sink_settings(&self) -> SinkSettings {
        SinkSettings {
            format: self.format,
            influxdb_measurement: self.influxdb_measurement.clone(),
            topic_prefix: self.topic_prefix.clone(),
            mqtt: MqttSettings {
                client_id: self.mqtt_client_id.clone(),
                username: self.mqtt_username.clone(),
                password: self.mqtt_password.clone(),
                qos: self.mqtt_qos,
                retain: self.mqtt_retain,
            },
        }
    }
}

/// Errors returned by the core run loop.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error("no target devices configured")]
    NoTargets,
}

/// The Bluetooth stack the run loop drives.
pub struct Bluetooth {
    pub discovery: Box<dyn Discovery>,
    pub connector: Box<dyn Connector>,
}

/// Open the default BlueZ adapter for discovery and GATT connections.
#[cfg(feature = "bluer")]
pub async fn open_bluetooth() -> Result<Bluetooth, ScanError> {
    let discovery = crate::scanner::bluer::BluerDiscovery::open().await?;
    let connector = crate::session::bluer::BluerConnector::new(discovery.adapter());
    Ok(Bluetooth {
        discovery: Box::new(discovery),
        connector: Box::new(connector),
    })
}

/// Session counts of a run, mainly for tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub sessions: usize,
    pub failures: usize,
}

/// Scan for allowlisted scales and run one session per match until
/// `shutdown` fires.
pub async fn run(
    options: &Options,
    bluetooth: Bluetooth,
    sinks: Vec<Box<dyn Sink>>,
    mut shutdown: Shutdown,
) -> Result<RunSummary, RunError> {
    let targets = options.allowlist();
    if targets.is_empty() {
        return Err(RunError::NoTargets);
    }
    let addresses: Vec<String> = targets.iter().map(MacAddress::normalized).collect();
    let sink_names: Vec<&str> = sinks.iter().map(|s| s.name()).collect();
    info!(targets = ?addresses, sinks = ?sink_names, "listening for scales");

    let mut scanner = Scanner::new(bluetooth.discovery, targets, options.scan_config());
    let mut sessions = SessionManager::new(
        options.session_config(),
        bluetooth.connector,
        Dispatcher::new(sinks),
    );
    let mut summary = RunSummary::default();

    while let Some(device) = scanner.next_target(&mut shutdown).await {
        let address = device.address;
        match sessions.run(address, &mut shutdown).await {
            Ok(session) => {
                info!(
                    address = %address.normalized(),
                    measurements = session.measurements,
                    person = ?session.dispatch.person,
                    delivered = session.dispatch.delivered,
                    failed = session.dispatch.failed,
                    "session complete"
                );
                scanner.record_success(address);
                summary.sessions += 1;
            }
            Err(SessionError::Interrupted) => break,
            Err(err) => {
                warn!(address = %address.normalized(), %err, "session failed");
                scanner.record_failure(address);
                summary.failures += 1;
            }
        }
    }

    info!(sessions = summary.sessions, failures = summary.failures, "stopped");
    Ok(summary)
}
