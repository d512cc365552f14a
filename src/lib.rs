//! `bs440-listener` library.
//!
//! The binary (`src/main.rs`) is responsible for CLI parsing, logging setup
//! and process exit codes. The core logic lives in [`crate::app`], which
//! drives the [`scanner`] and [`session`] state machine over an injected
//! Bluetooth stack and hands decoded batches to the configured [`sink`]s.

pub mod aggregate;
pub mod allowlist;
pub mod app;
pub mod duration;
pub mod mac_address;
pub mod measurement;
pub mod output;
pub mod protocol;
pub mod scanner;
pub mod session;
pub mod shutdown;
pub mod sink;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types at the crate root
pub use aggregate::{Aggregate, AggregateError, aggregate};
pub use allowlist::TargetAllowlist;
pub use mac_address::MacAddress;
pub use measurement::{Measurement, MeasurementBatch, MeasurementKind};
pub use output::OutputFormatter;
pub use output::influxdb::InfluxDbFormatter;
pub use output::json::JsonFormatter;
pub use protocol::{DecodeError, decode};
pub use scanner::ScanError;
pub use session::{SessionError, SessionManager};
pub use shutdown::Shutdown;
pub use sink::{Dispatcher, Sink, SinkError};
