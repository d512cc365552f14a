//! Static sink registry: turns configured sink specs into sink instances.

use crate::output::influxdb::InfluxDbFormatter;
use crate::output::json::JsonFormatter;
use crate::output::{Format, OutputFormatter};
use crate::sink::{PerMeasurement, Sink, UdpSink, WriterSink};
use std::fmt;

/// A configured sink, as given on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkSpec {
    /// Formatted lines on stdout.
    Stdout,
    /// Formatted lines as UDP datagrams to `host:port`.
    Udp(String),
    /// JSON readings published to an MQTT broker.
    #[cfg(feature = "mqtt")]
    Mqtt { host: String, port: u16 },
}

impl fmt::Display for SinkSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkSpec::Stdout => write!(f, "stdout"),
            SinkSpec::Udp(target) => write!(f, "udp://{target}"),
            #[cfg(feature = "mqtt")]
            SinkSpec::Mqtt { host, port } => write!(f, "mqtt://{host}:{port}"),
        }
    }
}

fn split_host_port(target: &str) -> Option<(&str, u16)> {
    let (host, port) = target.rsplit_once(':')?;
    let port = port.parse().ok()?;
    (!host.is_empty()).then_some((host, port))
}

/// Parse a sink spec: `stdout`, `udp://HOST:PORT` or `mqtt://HOST[:PORT]`.
///
/// # Example
/// ```
/// use bs440_listener::sink::{SinkSpec, parse_sink};
///
/// assert_eq!(parse_sink("stdout").unwrap(), SinkSpec::Stdout);
/// assert_eq!(
///     parse_sink("udp://localhost:8094").unwrap(),
///     SinkSpec::Udp("localhost:8094".to_string())
/// );
/// ```
pub fn parse_sink(src: &str) -> Result<SinkSpec, String> {
    let src = src.trim();
    if src.eq_ignore_ascii_case("stdout") || src == "-" {
        return Ok(SinkSpec::Stdout);
    }
    if let Some(target) = src.strip_prefix("udp://") {
        if split_host_port(target).is_none() {
            return Err(format!("invalid UDP target '{target}': expected HOST:PORT"));
        }
        return Ok(SinkSpec::Udp(target.to_string()));
    }
    #[cfg(feature = "mqtt")]
    if let Some(target) = src.strip_prefix("mqtt://") {
        let (host, port) = match split_host_port(target) {
            Some((host, port)) => (host, port),
            None if !target.is_empty() && !target.contains(':') => {
                (target, super::mqtt::DEFAULT_PORT)
            }
            None => return Err(format!("invalid MQTT broker '{target}': expected HOST[:PORT]")),
        };
        return Ok(SinkSpec::Mqtt {
            host: host.to_string(),
            port,
        });
    }
    Err(format!(
        "unknown sink '{src}': expected 'stdout', 'udp://HOST:PORT' or 'mqtt://HOST[:PORT]'"
    ))
}

/// Client settings for MQTT sinks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttSettings {
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// 0, 1 or 2.
    pub qos: u8,
    pub retain: bool,
}

/// Formatter settings shared by all sinks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkSettings {
    pub format: Format,
    pub influxdb_measurement: String,
    pub topic_prefix: String,
    pub mqtt: MqttSettings,
}

impl SinkSettings {
    pub fn formatter(&self) -> Box<dyn OutputFormatter> {
        match self.format {
            Format::Influxdb => {
                Box::new(InfluxDbFormatter::new(self.influxdb_measurement.clone()))
            }
            Format::Json => Box::new(JsonFormatter::new(self.topic_prefix.clone())),
        }
    }
}

/// Build sinks in the order given.
///
/// Network sinks that cannot be set up are still returned; they refuse
/// deliveries until connected.
pub async fn build_sinks(specs: &[SinkSpec], settings: &SinkSettings) -> Vec<Box<dyn Sink>> {
    let mut sinks: Vec<Box<dyn Sink>> = Vec::with_capacity(specs.len());
    for spec in specs {
        match spec {
            SinkSpec::Stdout => {
                sinks.push(Box::new(PerMeasurement(WriterSink::stdout(settings.formatter()))));
            }
            SinkSpec::Udp(target) => {
                let sink = UdpSink::connect(target, settings.formatter()).await;
                sinks.push(Box::new(PerMeasurement(sink)));
            }
            #[cfg(feature = "mqtt")]
            SinkSpec::Mqtt { host, port } => {
                let formatter = JsonFormatter::new(settings.topic_prefix.clone());
                let sink = super::MqttSink::connect(host, *port, &settings.mqtt, formatter);
                sinks.push(Box::new(PerMeasurement(sink)));
            }
        }
    }
    sinks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(format: Format) -> SinkSettings {
        SinkSettings {
            format,
            influxdb_measurement: "body_composition".to_string(),
            topic_prefix: "medisana/bs440".to_string(),
            mqtt: MqttSettings {
                client_id: "bs440-test".to_string(),
                username: None,
                password: None,
                qos: 0,
                retain: true,
            },
        }
    }

    #[test]
    fn test_parse_sink() {
        assert_eq!(parse_sink("stdout").unwrap(), SinkSpec::Stdout);
        assert_eq!(parse_sink("STDOUT").unwrap(), SinkSpec::Stdout);
        assert_eq!(parse_sink("-").unwrap(), SinkSpec::Stdout);
        assert_eq!(
            parse_sink("udp://127.0.0.1:8094").unwrap(),
            SinkSpec::Udp("127.0.0.1:8094".to_string())
        );
        assert!(parse_sink("udp://nohost").is_err());
        assert!(parse_sink("udp://:8094").is_err());
        assert!(parse_sink("udp://host:notaport").is_err());
        assert!(parse_sink("tcp://broker:1883").is_err());
    }

    #[cfg(feature = "mqtt")]
    #[test]
    fn test_parse_mqtt_sink() {
        assert_eq!(
            parse_sink("mqtt://broker.local:1884").unwrap(),
            SinkSpec::Mqtt {
                host: "broker.local".to_string(),
                port: 1884
            }
        );
        assert_eq!(
            parse_sink("mqtt://broker").unwrap(),
            SinkSpec::Mqtt {
                host: "broker".to_string(),
                port: 1883
            }
        );
        assert_eq!(parse_sink("mqtt://broker").unwrap().to_string(), "mqtt://broker:1883");
        assert!(parse_sink("mqtt://").is_err());
        assert!(parse_sink("mqtt://broker:x").is_err());
    }

    #[test]
    fn test_sink_spec_display() {
        assert_eq!(SinkSpec::Stdout.to_string(), "stdout");
        assert_eq!(SinkSpec::Udp("h:1".into()).to_string(), "udp://h:1");
    }

    #[tokio::test]
    async fn test_build_sinks_keeps_order() {
        let sinks = build_sinks(
            &[SinkSpec::Udp("127.0.0.1:9".to_string()), SinkSpec::Stdout],
            &settings(Format::Influxdb),
        )
        .await;
        let names: Vec<&str> = sinks.iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["udp://127.0.0.1:9", "stdout"]);
    }

    #[test]
    fn test_formatter_follows_format() {
        use crate::test_utils::weight;

        let line = settings(Format::Json).formatter().format(&weight(1, 7500, 0)).unwrap();
        assert!(line.starts_with("medisana/bs440/person1/weight "));

        let line = settings(Format::Influxdb)
            .formatter()
            .format(&weight(1, 7500, 0))
            .unwrap();
        assert!(line.starts_with("body_composition,kind=weight,person=1 "));
    }
}
