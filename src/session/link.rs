//! GATT client abstraction used by the session state machine.
//!
//! The session only needs a handful of primitives: enumerate services,
//! acknowledged writes, and a bounded wait for the next notification. The
//! BlueZ implementation lives in [`super::bluer`]; tests script fakes.

use crate::mac_address::MacAddress;
use futures::future::BoxFuture;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Errors from the GATT transport, classified by how a session reacts.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// The peer went away.
    #[error("device disconnected: {0}")]
    Disconnected(String),
    /// Establishing the link failed.
    #[error("connection failed: {0}")]
    Connect(String),
    /// A GATT operation failed while the link stayed up.
    #[error("GATT operation failed: {0}")]
    Transport(String),
    /// Anything the transport did not expect.
    #[error("unexpected transport error: {0}")]
    Unexpected(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattCharacteristic {
    pub uuid: Uuid,
    /// Value handle; the configuration descriptor sits at `handle + 1`.
    pub handle: u16,
    pub indicate: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattService {
    pub uuid: Uuid,
    pub characteristics: Vec<GattCharacteristic>,
}

/// A value pushed by the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub handle: u16,
    pub value: Vec<u8>,
}

/// An established connection to one device.
pub trait GattLink: Send {
    fn services(&mut self) -> BoxFuture<'_, Result<Vec<GattService>, LinkError>>;

    /// Acknowledged write to a descriptor handle.
    fn write_descriptor<'a>(
        &'a mut self,
        handle: u16,
        value: &'a [u8],
    ) -> BoxFuture<'a, Result<(), LinkError>>;

    /// Acknowledged write to a characteristic value handle.
    fn write_characteristic<'a>(
        &'a mut self,
        handle: u16,
        value: &'a [u8],
    ) -> BoxFuture<'a, Result<(), LinkError>>;

    /// Wait up to `wait` for the next notification; `Ok(None)` on timeout.
    fn next_notification(
        &mut self,
        wait: Duration,
    ) -> BoxFuture<'_, Result<Option<Notification>, LinkError>>;

    fn disconnect(&mut self) -> BoxFuture<'_, Result<(), LinkError>>;
}

/// Opens links, bounded by the transport's own connect timeout.
pub trait Connector: Send + Sync {
    fn connect(&self, address: MacAddress) -> BoxFuture<'_, Result<Box<dyn GattLink>, LinkError>>;
}
