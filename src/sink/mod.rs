//! Consumers of finished measurement batches.
//!
//! A [`Sink`] receives every session's aggregate together with the raw
//! batch it was built from. Most sinks only care about individual readings
//! and implement [`MeasurementSink`] instead, wrapped in [`PerMeasurement`].
//!
//! Sinks never take the session down: the [`Dispatcher`] logs their errors
//! and moves on to the next one.

pub mod dispatch;
#[cfg(feature = "mqtt")]
pub mod mqtt;
pub mod registry;
pub mod udp;
pub mod writer;

pub use dispatch::{DispatchReport, Dispatcher};
#[cfg(feature = "mqtt")]
pub use mqtt::MqttSink;
pub use registry::{MqttSettings, SinkSettings, SinkSpec, build_sinks, parse_sink};
pub use udp::UdpSink;
pub use writer::WriterSink;

use crate::aggregate::Aggregate;
use crate::measurement::{Measurement, MeasurementBatch, PersonId};
use crate::output::FormatError;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SinkError {
    /// The sink has no usable connection; nothing was attempted.
    #[error("not connected")]
    NotConnected,
    #[error("format error: {0}")]
    Format(#[from] FormatError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[cfg(feature = "mqtt")]
    #[error("MQTT client error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),
    #[error("{failed} of {total} measurements not delivered, last error: {last}")]
    Partial {
        failed: usize,
        total: usize,
        last: Box<SinkError>,
    },
}

/// What a sink receives at the end of a session.
#[derive(Debug, Clone, Copy)]
pub struct Delivery<'a> {
    /// Every decoded measurement of the session, in arrival order.
    pub batch: &'a MeasurementBatch,
    /// The readings selected for publishing.
    pub aggregate: &'a Aggregate,
}

pub trait Sink {
    /// Name used in log messages.
    fn name(&self) -> &str;

    fn deliver(&mut self, delivery: &Delivery<'_>) -> Result<(), SinkError>;
}

/// A sink that handles one published measurement at a time.
pub trait MeasurementSink {
    fn name(&self) -> &str;

    fn publish(&mut self, person: PersonId, measurement: &Measurement) -> Result<(), SinkError>;
}

/// Adapts a [`MeasurementSink`] to [`Sink`] by publishing each aggregated
/// reading in turn.
///
/// A failing reading does not stop the remaining ones; the sink reports
/// [`SinkError::Partial`] afterwards.
pub struct PerMeasurement<S>(pub S);

impl<S: MeasurementSink> PerMeasurement<S> {
    pub fn into_inner(self) -> S {
        self.0
    }
}

impl<S: MeasurementSink> Sink for PerMeasurement<S> {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn deliver(&mut self, delivery: &Delivery<'_>) -> Result<(), SinkError> {
        let person = delivery.aggregate.person();
        let total = delivery.aggregate.len();
        let mut failed = 0;
        let mut last = None;

        for (_, measurement) in delivery.aggregate.readings() {
            if let Err(err) = self.0.publish(person, measurement) {
                // Without a connection the rest would fail the same way.
                if matches!(err, SinkError::NotConnected) {
                    return Err(err);
                }
                failed += 1;
                last = Some(err);
            }
        }

        match last {
            None => Ok(()),
            Some(last) => Err(SinkError::Partial {
                failed,
                total,
                last: Box::new(last),
            }),
        }
    }
}
