//! Connection lifecycle for one scale.
//!
//! A session walks `Connecting → DiscoveringServices → EnablingNotifications
//! → SendingStart → SyncingTime → Collecting → {TimedOut | Disconnected} →
//! Closed`. Every attempt that got a link ends with a disconnect, whatever
//! happened in between.
//!
//! Collection is a fixed wall-clock window: incoming notifications do not
//! extend it. Decoded measurements are buffered in arrival order and handed
//! to the [`Dispatcher`] when the session ends, or before a retry when the
//! scale dropped the link mid-session.

#[cfg(feature = "bluer")]
pub mod bluer;
pub mod link;

pub use link::{Connector, GattCharacteristic, GattLink, GattService, LinkError, Notification};

use crate::mac_address::MacAddress;
use crate::measurement::MeasurementBatch;
use crate::protocol::{
    self, COMMAND_CHARACTERISTIC, ENABLE_INDICATION, MEASUREMENT_SERVICE, START_COMMAND,
    time_sync_command,
};
use crate::shutdown::Shutdown;
use crate::sink::{DispatchReport, Dispatcher};
use chrono::Utc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

const MIN_POLL_SLICE: Duration = Duration::from_millis(10);

/// Await one transport step, abandoning it when shutdown is requested.
async fn interruptible<T>(
    shutdown: &Shutdown,
    step: impl Future<Output = Result<T, LinkError>>,
) -> Result<T, SessionError> {
    let mut shutdown = shutdown.clone();
    tokio::select! {
        result = step => Ok(result?),
        _ = shutdown.triggered() => {
            info!("interrupted during handshake");
            Err(SessionError::Interrupted)
        }
    }
}

/// Timing and retry budget of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Connection attempts before giving up on the device.
    pub connect_attempts: u32,
    /// Pause between attempts.
    pub retry_backoff: Duration,
    /// Length of the collection window, from the end of the command handshake.
    pub collect_window: Duration,
    /// Longest single wait for a notification.
    pub poll_slice: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_attempts: 3,
            retry_backoff: Duration::from_secs(1),
            collect_window: Duration::from_secs(30),
            poll_slice: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Scanning,
    Connecting,
    DiscoveringServices,
    EnablingNotifications,
    SendingStart,
    SyncingTime,
    Collecting,
    TimedOut,
    Disconnected,
    Closed,
}

/// Why collection stopped without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionEnd {
    /// The collection window elapsed.
    Deadline,
    /// The transport failed while the link was still up.
    TransportError,
    /// Operator interrupt.
    Interrupted,
}

/// How the attempt loop reacts to a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Hand buffered measurements to the sinks, then retry.
    RetryAfterFlush,
    Retry,
    /// Stop trying this device.
    Abort,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error(transparent)]
    Link(#[from] LinkError),
    #[error("measurement service {0} not found")]
    ServiceNotFound(Uuid),
    #[error("command characteristic {0} not found")]
    CommandCharacteristicNotFound(Uuid),
    #[error("characteristic handle {0:#06x} has no descriptor slot")]
    InvalidHandle(u16),
    #[error("no measurements received")]
    NoMeasurements,
    #[error("giving up after {0} connection attempts")]
    RetriesExhausted(u32),
    #[error("interrupted")]
    Interrupted,
}

impl SessionError {
    pub fn recovery(&self) -> Recovery {
        match self {
            SessionError::Link(LinkError::Disconnected(_)) => Recovery::RetryAfterFlush,
            SessionError::Link(LinkError::Connect(_) | LinkError::Transport(_)) => Recovery::Retry,
            _ => Recovery::Abort,
        }
    }
}

/// State of the current connection attempt cycle for one device.
#[derive(Debug)]
pub struct Session {
    target: MacAddress,
    attempt: u32,
    state: SessionState,
    batch: MeasurementBatch,
}

impl Session {
    pub fn new(target: MacAddress) -> Self {
        Self {
            target,
            attempt: 0,
            state: SessionState::Scanning,
            batch: MeasurementBatch::new(),
        }
    }

    pub fn target(&self) -> MacAddress {
        self.target
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn batch(&self) -> &MeasurementBatch {
        &self.batch
    }

    fn begin_attempt(&mut self, attempt: u32) {
        self.attempt = attempt;
        self.batch.clear();
        self.transition(SessionState::Connecting);
    }

    fn transition(&mut self, next: SessionState) {
        debug!(from = ?self.state, to = ?next, "session state");
        self.state = next;
    }

    fn take_batch(&mut self) -> MeasurementBatch {
        std::mem::take(&mut self.batch)
    }
}

/// Result of a session that delivered measurements.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub target: MacAddress,
    /// Attempt number that completed.
    pub attempts: u32,
    pub end: CollectionEnd,
    pub measurements: usize,
    pub dispatch: DispatchReport,
}

/// Runs sessions against one device at a time and feeds the sinks.
pub struct SessionManager {
    config: SessionConfig,
    connector: Box<dyn Connector>,
    dispatcher: Dispatcher,
}

impl SessionManager {
    pub fn new(
        config: SessionConfig,
        connector: Box<dyn Connector>,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            config,
            connector,
            dispatcher,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Connect to `target`, collect, and dispatch, retrying per the budget.
    ///
    /// # Errors
    /// - [`SessionError::NoMeasurements`]: the session completed but nothing decoded
    /// - [`SessionError::RetriesExhausted`]: every attempt hit a transient failure
    /// - [`SessionError::Interrupted`]: shutdown requested before collection
    /// - any error whose [`Recovery`] is `Abort`
    pub async fn run(
        &mut self,
        target: MacAddress,
        shutdown: &mut Shutdown,
    ) -> Result<SessionSummary, SessionError> {
        let span = info_span!("session", address = %target.normalized());
        self.run_attempts(target, shutdown).instrument(span).await
    }

    async fn run_attempts(
        &mut self,
        target: MacAddress,
        shutdown: &mut Shutdown,
    ) -> Result<SessionSummary, SessionError> {
        let attempts = self.config.connect_attempts.max(1);
        let mut session = Session::new(target);

        for attempt in 1..=attempts {
            if shutdown.is_triggered() {
                return Err(SessionError::Interrupted);
            }
            session.begin_attempt(attempt);
            info!(attempt, attempts, "connection attempt");

            match self.attempt(&mut session, shutdown).await {
                Ok(end) => {
                    let batch = session.take_batch();
                    let dispatch = self.dispatcher.dispatch(&batch);
                    if batch.is_empty() {
                        warn!(?end, "session ended without measurements");
                        return Err(SessionError::NoMeasurements);
                    }
                    return Ok(SessionSummary {
                        target,
                        attempts: attempt,
                        end,
                        measurements: batch.len(),
                        dispatch,
                    });
                }
                Err(SessionError::Interrupted) => return Err(SessionError::Interrupted),
                Err(err) => match err.recovery() {
                    Recovery::RetryAfterFlush => {
                        warn!(attempt, %err, "device disconnected during session");
                        let partial = session.take_batch();
                        if !partial.is_empty() {
                            info!(measurements = partial.len(), "flushing partial batch");
                            self.dispatcher.dispatch(&partial);
                        }
                    }
                    Recovery::Retry => {
                        warn!(attempt, %err, "connection failed");
                    }
                    Recovery::Abort => {
                        error!(attempt, %err, "unexpected error, giving up on device");
                        return Err(err);
                    }
                },
            }

            if attempt < attempts && !shutdown.pause(self.config.retry_backoff).await {
                return Err(SessionError::Interrupted);
            }
        }

        Err(SessionError::RetriesExhausted(attempts))
    }

    /// One connect-to-disconnect pass.
    async fn attempt(
        &self,
        session: &mut Session,
        shutdown: &Shutdown,
    ) -> Result<CollectionEnd, SessionError> {
        let connect = self.connector.connect(session.target);
        let mut link = match interruptible(shutdown, connect).await {
            Ok(link) => link,
            Err(err) => {
                session.transition(SessionState::Closed);
                return Err(err);
            }
        };
        info!("connected");

        let result = self.exchange(link.as_mut(), session, shutdown).await;

        if let Err(err) = link.disconnect().await {
            debug!(%err, "disconnect failed");
        }
        session.transition(SessionState::Closed);
        info!(measurements = session.batch.len(), "disconnected");

        result
    }

    async fn exchange(
        &self,
        link: &mut dyn GattLink,
        session: &mut Session,
        shutdown: &Shutdown,
    ) -> Result<CollectionEnd, SessionError> {
        session.transition(SessionState::DiscoveringServices);
        let services = interruptible(shutdown, link.services()).await?;
        let service = services
            .into_iter()
            .find(|s| s.uuid == MEASUREMENT_SERVICE)
            .ok_or(SessionError::ServiceNotFound(MEASUREMENT_SERVICE))?;
        info!("found measurement service");

        session.transition(SessionState::EnablingNotifications);
        for characteristic in service.characteristics.iter().filter(|c| c.indicate) {
            let descriptor = characteristic
                .handle
                .checked_add(1)
                .ok_or(SessionError::InvalidHandle(characteristic.handle))?;
            debug!(uuid = %characteristic.uuid, descriptor, "enabling indications");
            let write = link.write_descriptor(descriptor, &ENABLE_INDICATION);
            interruptible(shutdown, write).await?;
        }

        let command = service
            .characteristics
            .iter()
            .find(|c| c.uuid == COMMAND_CHARACTERISTIC)
            .ok_or(SessionError::CommandCharacteristicNotFound(COMMAND_CHARACTERISTIC))?;

        session.transition(SessionState::SendingStart);
        let start = link.write_characteristic(command.handle, &[START_COMMAND]);
        interruptible(shutdown, start).await?;

        session.transition(SessionState::SyncingTime);
        let sync = time_sync_command(Utc::now().timestamp());
        debug!(command = %hex::encode(sync), "sending time sync");
        match interruptible(shutdown, link.write_characteristic(command.handle, &sync)).await {
            Ok(()) => info!("scale time synchronized"),
            Err(SessionError::Interrupted) => return Err(SessionError::Interrupted),
            Err(err) => warn!(%err, "failed to synchronize scale time"),
        }

        session.transition(SessionState::Collecting);
        info!(window = ?self.config.collect_window, "waiting for measurements");
        self.collect(link, session, shutdown).await
    }

    async fn collect(
        &self,
        link: &mut dyn GattLink,
        session: &mut Session,
        shutdown: &Shutdown,
    ) -> Result<CollectionEnd, SessionError> {
        let deadline = Instant::now() + self.config.collect_window;
        let slice = self.config.poll_slice.max(MIN_POLL_SLICE);

        loop {
            if shutdown.is_triggered() {
                info!("collection interrupted");
                return Ok(CollectionEnd::Interrupted);
            }
            let now = Instant::now();
            if now >= deadline {
                session.transition(SessionState::TimedOut);
                return Ok(CollectionEnd::Deadline);
            }

            match link.next_notification(slice.min(deadline - now)).await {
                Ok(Some(notification)) => {
                    debug!(
                        handle = notification.handle,
                        frame = %hex::encode(&notification.value),
                        "notification"
                    );
                    if let Some(measurement) = protocol::decode(&notification.value) {
                        info!(
                            kind = %measurement.kind(),
                            person = measurement.person(),
                            "measurement received"
                        );
                        session.batch.push(measurement);
                    }
                }
                Ok(None) => {}
                Err(LinkError::Disconnected(reason)) => {
                    session.transition(SessionState::Disconnected);
                    return Err(LinkError::Disconnected(reason).into());
                }
                Err(err) => {
                    warn!(%err, "transport error, ending collection early");
                    session.transition(SessionState::Disconnected);
                    return Ok(CollectionEnd::TransportError);
                }
            }
        }
    }
}
