//! Output formatters for scale measurements.
//!
//! A formatter turns one measurement into one line of text. Sinks decide
//! where the line goes (stdout, a datagram socket).

pub mod influxdb;
pub mod json;

use crate::measurement::Measurement;
use thiserror::Error;

/// Errors raised while rendering a measurement.
#[derive(Error, Debug)]
pub enum FormatError {
    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Trait for formatting measurements into output lines.
pub trait OutputFormatter: Send + Sync {
    /// Format a measurement as a single line, without trailing newline.
    fn format(&self, measurement: &Measurement) -> Result<String, FormatError>;
}

/// Available line formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Format {
    /// InfluxDB line protocol (Telegraf compatible)
    #[default]
    Influxdb,
    /// `<topic> <json>` pairs using the MQTT topic layout of the scale tooling
    Json,
}

impl std::fmt::Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Format::Influxdb => write!(f, "influxdb"),
            Format::Json => write!(f, "json"),
        }
    }
}
