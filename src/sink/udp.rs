//! Datagram sink, e.g. for a Telegraf `socket_listener` input.
//!
//! One formatted line per datagram. The socket is set up once; if that
//! fails the sink stays disconnected and every delivery is refused with
//! [`SinkError::NotConnected`]. Sends never wait: a full socket buffer is
//! reported as an I/O error for that reading.

use crate::measurement::{Measurement, PersonId};
use crate::output::OutputFormatter;
use crate::sink::{MeasurementSink, SinkError};
use std::io;
use std::net::SocketAddr;
use tokio::net::{UdpSocket, lookup_host};
use tracing::{debug, info, warn};

pub struct UdpSink {
    name: String,
    socket: Option<UdpSocket>,
    formatter: Box<dyn OutputFormatter>,
}

impl UdpSink {
    /// Create a sink sending to `target` (`host:port`).
    ///
    /// Never fails: setup errors are logged and leave the sink disconnected.
    pub async fn connect(target: &str, formatter: Box<dyn OutputFormatter>) -> Self {
        let name = format!("udp://{target}");
        let socket = match open_socket(target).await {
            Ok(socket) => {
                info!(sink = %name, "UDP sink ready");
                Some(socket)
            }
            Err(err) => {
                warn!(sink = %name, %err, "UDP sink not connected, deliveries will be skipped");
                None
            }
        };
        Self {
            name,
            socket,
            formatter,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.socket.is_some()
    }
}

async fn open_socket(target: &str) -> io::Result<UdpSocket> {
    let remote = lookup_host(target)
        .await?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "address resolved to nothing"))?;
    let local: SocketAddr = if remote.is_ipv4() {
        ([0, 0, 0, 0], 0).into()
    } else {
        ([0u16; 8], 0).into()
    };
    let socket = UdpSocket::bind(local).await?;
    socket.connect(remote).await?;
    socket.writable().await?;
    Ok(socket)
}

impl MeasurementSink for UdpSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn publish(&mut self, _person: PersonId, measurement: &Measurement) -> Result<(), SinkError> {
        let Some(socket) = &self.socket else {
            return Err(SinkError::NotConnected);
        };
        let line = self.formatter.format(measurement)?;
        let sent = socket.try_send(line.as_bytes())?;
        debug!(sink = %self.name, bytes = sent, "datagram sent");
        Ok(())
    }
}
