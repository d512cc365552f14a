//! MQTT publisher.
//!
//! Every reading goes to `<prefix>/person<N>/<kind>` with the JSON payload
//! of [`JsonFormatter`]. The client's event loop runs on its own task and
//! reconnects by itself; while the broker is unreachable deliveries are
//! refused with [`SinkError::NotConnected`].

use crate::measurement::{Measurement, PersonId};
use crate::output::json::JsonFormatter;
use crate::sink::{MeasurementSink, MqttSettings, SinkError};
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, QoS};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const KEEP_ALIVE: Duration = Duration::from_secs(60);
const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const REQUEST_CAPACITY: usize = 64;

pub const DEFAULT_PORT: u16 = 1883;

fn qos(level: u8) -> QoS {
    match level {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        _ => QoS::ExactlyOnce,
    }
}

pub struct MqttSink {
    name: String,
    client: AsyncClient,
    connected: Arc<AtomicBool>,
    qos: QoS,
    retain: bool,
    formatter: JsonFormatter,
    event_loop: JoinHandle<()>,
}

impl MqttSink {
    /// Start a client for the broker at `host:port`.
    ///
    /// Returns immediately; the connection is made in the background.
    pub fn connect(
        host: &str,
        port: u16,
        settings: &MqttSettings,
        formatter: JsonFormatter,
    ) -> Self {
        let name = format!("mqtt://{host}:{port}");
        let mut options = MqttOptions::new(settings.client_id.clone(), host, port);
        options.set_keep_alive(KEEP_ALIVE);
        if let (Some(username), Some(password)) = (&settings.username, &settings.password) {
            options.set_credentials(username.clone(), password.clone());
        }

        let (client, event_loop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let connected = Arc::new(AtomicBool::new(false));
        info!(sink = %name, "connecting to MQTT broker");
        let event_loop = tokio::spawn(drive(event_loop, connected.clone(), name.clone()));

        Self {
            name,
            client,
            connected,
            qos: qos(settings.qos),
            retain: settings.retain,
            formatter,
            event_loop,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

async fn drive(mut event_loop: EventLoop, connected: Arc<AtomicBool>, name: String) {
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if ack.code == ConnectReturnCode::Success {
                    info!(sink = %name, "connected to MQTT broker");
                    connected.store(true, Ordering::Release);
                } else {
                    warn!(sink = %name, code = ?ack.code, "MQTT broker refused connection");
                }
            }
            Ok(Event::Incoming(Packet::PubAck(ack))) => {
                debug!(sink = %name, pkid = ack.pkid, "publish acknowledged");
            }
            Ok(_) => {}
            Err(err) => {
                if connected.swap(false, Ordering::AcqRel) {
                    warn!(sink = %name, %err, "lost connection to MQTT broker");
                } else {
                    debug!(sink = %name, %err, "MQTT broker unreachable");
                }
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
}

impl Drop for MqttSink {
    fn drop(&mut self) {
        self.event_loop.abort();
    }
}

impl MeasurementSink for MqttSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn publish(&mut self, _person: PersonId, measurement: &Measurement) -> Result<(), SinkError> {
        if !self.is_connected() {
            return Err(SinkError::NotConnected);
        }
        let topic = self.formatter.topic(measurement);
        let payload = self.formatter.payload(measurement)?;
        self.client.try_publish(topic.as_str(), self.qos, self.retain, payload)?;
        info!(sink = %self.name, %topic, "published");
        Ok(())
    }
}
