//! BlueZ GATT client backend.
//!
//! BlueZ owns the client characteristic configuration descriptors, so
//! enabling indications maps onto starting a notify session; values from
//! every enabled characteristic are forwarded into one channel by per
//! characteristic tasks. Characteristic handles are BlueZ object ids.

use super::link::{Connector, GattCharacteristic, GattLink, GattService, LinkError, Notification};
use crate::mac_address::MacAddress;
use crate::protocol::ENABLE_INDICATION;
use bluer::gatt::WriteOp;
use bluer::gatt::remote::{Characteristic, CharacteristicWriteRequest};
use bluer::{Adapter, Device};
use futures::StreamExt;
use futures::future::BoxFuture;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, timeout};
use tracing::debug;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(20);
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);
const SERVICES_RESOLVE_TIMEOUT: Duration = Duration::from_secs(10);
const SERVICES_POLL_INTERVAL: Duration = Duration::from_millis(100);
const NOTIFICATION_BUFFER_SIZE: usize = 64;

fn transport(err: bluer::Error) -> LinkError {
    LinkError::Transport(err.to_string())
}

pub struct BluerConnector {
    adapter: Adapter,
}

impl BluerConnector {
    pub fn new(adapter: Adapter) -> Self {
        Self { adapter }
    }
}

impl Connector for BluerConnector {
    fn connect(&self, address: MacAddress) -> BoxFuture<'_, Result<Box<dyn GattLink>, LinkError>> {
        Box::pin(async move {
            let device = self
                .adapter
                .device(address.into())
                .map_err(|err| LinkError::Unexpected(err.to_string()))?;

            match timeout(CONNECT_TIMEOUT, device.connect()).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => return Err(LinkError::Connect(err.to_string())),
                Err(_) => {
                    // Cancel the pending connection attempt in BlueZ as well.
                    let _ = device.disconnect().await;
                    return Err(LinkError::Connect("timed out".to_string()));
                }
            }

            Ok(Box::new(BluerLink::new(device)) as Box<dyn GattLink>)
        })
    }
}

pub struct BluerLink {
    device: Device,
    characteristics: Vec<Characteristic>,
    tx: mpsc::Sender<Notification>,
    rx: mpsc::Receiver<Notification>,
    forwarders: Vec<JoinHandle<()>>,
}

impl BluerLink {
    fn new(device: Device) -> Self {
        let (tx, rx) = mpsc::channel(NOTIFICATION_BUFFER_SIZE);
        Self {
            device,
            characteristics: Vec::new(),
            tx,
            rx,
            forwarders: Vec::new(),
        }
    }

    /// A failed operation on a dropped link is a disconnect, otherwise a
    /// transport error.
    async fn classify(&self, err: bluer::Error) -> LinkError {
        match self.device.is_connected().await {
            Ok(true) => LinkError::Transport(err.to_string()),
            _ => LinkError::Disconnected(err.to_string()),
        }
    }

    fn characteristic(&self, handle: u16) -> Result<&Characteristic, LinkError> {
        self.characteristics
            .iter()
            .find(|c| c.id() == handle)
            .ok_or_else(|| {
                LinkError::Unexpected(format!("no characteristic with handle {handle:#06x}"))
            })
    }

    async fn wait_services_resolved(&self) -> Result<(), LinkError> {
        let deadline = Instant::now() + SERVICES_RESOLVE_TIMEOUT;
        loop {
            match self.device.is_services_resolved().await {
                Ok(true) => return Ok(()),
                Ok(false) => {}
                Err(err) => return Err(self.classify(err).await),
            }
            if Instant::now() >= deadline {
                return Err(LinkError::Transport("services not resolved".to_string()));
            }
            sleep(SERVICES_POLL_INTERVAL).await;
        }
    }

    async fn enable_indications(&mut self, handle: u16) -> Result<(), LinkError> {
        let characteristic = self.characteristic(handle)?.clone();
        let tx = self.tx.clone();
        let (ack_tx, ack_rx) = oneshot::channel();

        let forwarder = tokio::spawn(async move {
            let stream = match characteristic.notify().await {
                Ok(stream) => {
                    let _ = ack_tx.send(Ok(()));
                    stream
                }
                Err(err) => {
                    let _ = ack_tx.send(Err(err));
                    return;
                }
            };
            let mut stream = Box::pin(stream);
            while let Some(value) = stream.next().await {
                if tx.send(Notification { handle, value }).await.is_err() {
                    break;
                }
            }
            debug!(handle, "indication stream ended");
        });
        self.forwarders.push(forwarder);

        match timeout(WRITE_TIMEOUT, ack_rx).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(err))) => Err(self.classify(err).await),
            Ok(Err(_)) => Err(LinkError::Unexpected("indication task ended".to_string())),
            Err(_) => Err(LinkError::Transport(format!(
                "enabling indications on {handle:#06x} timed out"
            ))),
        }
    }

    fn stop_forwarders(&mut self) {
        for forwarder in self.forwarders.drain(..) {
            forwarder.abort();
        }
    }
}

impl Drop for BluerLink {
    fn drop(&mut self) {
        self.stop_forwarders();
    }
}

impl GattLink for BluerLink {
    fn services(&mut self) -> BoxFuture<'_, Result<Vec<GattService>, LinkError>> {
        Box::pin(async move {
            self.wait_services_resolved().await?;
            let services = match self.device.services().await {
                Ok(services) => services,
                Err(err) => return Err(self.classify(err).await),
            };

            self.characteristics.clear();
            let mut result = Vec::with_capacity(services.len());
            for service in services {
                let uuid = service.uuid().await.map_err(transport)?;
                let mut characteristics = Vec::new();
                for characteristic in service.characteristics().await.map_err(transport)? {
                    let flags = characteristic.flags().await.map_err(transport)?;
                    characteristics.push(GattCharacteristic {
                        uuid: characteristic.uuid().await.map_err(transport)?,
                        handle: characteristic.id(),
                        indicate: flags.indicate,
                    });
                    self.characteristics.push(characteristic);
                }
                result.push(GattService {
                    uuid,
                    characteristics,
                });
            }
            Ok(result)
        })
    }

    fn write_descriptor<'a>(
        &'a mut self,
        handle: u16,
        value: &'a [u8],
    ) -> BoxFuture<'a, Result<(), LinkError>> {
        Box::pin(async move {
            let characteristic_handle = handle.checked_sub(1).ok_or_else(|| {
                LinkError::Unexpected(format!("invalid descriptor handle {handle:#06x}"))
            })?;
            if value == ENABLE_INDICATION.as_slice() {
                return self.enable_indications(characteristic_handle).await;
            }

            let characteristic = self.characteristic(characteristic_handle)?;
            let descriptors = characteristic.descriptors().await.map_err(transport)?;
            let descriptor = descriptors
                .into_iter()
                .find(|d| d.id() == handle)
                .ok_or_else(|| {
                    LinkError::Unexpected(format!("no descriptor with handle {handle:#06x}"))
                })?;
            match timeout(WRITE_TIMEOUT, descriptor.write(value)).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(err)) => Err(self.classify(err).await),
                Err(_) => Err(LinkError::Transport(format!("write to {handle:#06x} timed out"))),
            }
        })
    }

    fn write_characteristic<'a>(
        &'a mut self,
        handle: u16,
        value: &'a [u8],
    ) -> BoxFuture<'a, Result<(), LinkError>> {
        Box::pin(async move {
            let characteristic = self.characteristic(handle)?;
            let mut request = CharacteristicWriteRequest::default();
            request.op_type = WriteOp::Request;
            match timeout(WRITE_TIMEOUT, characteristic.write_ext(value, &request)).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(err)) => Err(self.classify(err).await),
                Err(_) => Err(LinkError::Transport(format!("write to {handle:#06x} timed out"))),
            }
        })
    }

    fn next_notification(
        &mut self,
        wait: Duration,
    ) -> BoxFuture<'_, Result<Option<Notification>, LinkError>> {
        Box::pin(async move {
            match timeout(wait, self.rx.recv()).await {
                Ok(Some(notification)) => Ok(Some(notification)),
                Ok(None) => Err(LinkError::Disconnected("notification channel closed".to_string())),
                Err(_) => match self.device.is_connected().await {
                    Ok(true) => Ok(None),
                    Ok(false) => Err(LinkError::Disconnected("link lost".to_string())),
                    Err(err) => Err(transport(err)),
                },
            }
        })
    }

    fn disconnect(&mut self) -> BoxFuture<'_, Result<(), LinkError>> {
        Box::pin(async move {
            self.stop_forwarders();
            self.device.disconnect().await.map_err(transport)
        })
    }
}
