//! JSON output with MQTT-style topics.
//!
//! Each line is `<prefix>/person<N>/<kind> <payload>`, the topic layout and
//! payload used by existing BS440 MQTT consumers. The MQTT sink publishes the
//! same topic and payload directly.

use crate::measurement::Measurement;
use crate::output::{FormatError, OutputFormatter};

pub const DEFAULT_TOPIC_PREFIX: &str = "medisana/bs440";

pub struct JsonFormatter {
    topic_prefix: String,
}

impl JsonFormatter {
    pub fn new(topic_prefix: String) -> Self {
        Self {
            topic_prefix: topic_prefix.trim_end_matches('/').to_string(),
        }
    }

    pub fn topic(&self, measurement: &Measurement) -> String {
        format!(
            "{}/person{}/{}",
            self.topic_prefix,
            measurement.person(),
            measurement.kind()
        )
    }

    pub fn payload(&self, measurement: &Measurement) -> Result<String, FormatError> {
        Ok(serde_json::to_string(measurement)?)
    }
}

impl Default for JsonFormatter {
    fn default() -> Self {
        Self::new(DEFAULT_TOPIC_PREFIX.to_string())
    }
}

impl OutputFormatter for JsonFormatter {
    fn format(&self, measurement: &Measurement) -> Result<String, FormatError> {
        Ok(format!(
            "{} {}",
            self.topic(measurement),
            self.payload(measurement)?
        ))
    }
}
