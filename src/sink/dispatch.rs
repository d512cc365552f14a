//! Hand a finished batch to every registered sink.

use crate::aggregate::{AggregateError, aggregate};
use crate::measurement::{MeasurementBatch, PersonId};
use crate::sink::{Delivery, Sink};
use tracing::{debug, info, warn};

/// Outcome of one dispatch, mainly for logging and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Person resolved from the batch, if any.
    pub person: Option<PersonId>,
    /// Number of aggregated readings offered to each sink.
    pub readings: usize,
    pub delivered: usize,
    pub failed: usize,
}

/// Sinks in registration order.
#[derive(Default)]
pub struct Dispatcher {
    sinks: Vec<Box<dyn Sink>>,
}

impl Dispatcher {
    pub fn new(sinks: Vec<Box<dyn Sink>>) -> Self {
        Self { sinks }
    }

    pub fn register(&mut self, sink: Box<dyn Sink>) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Aggregate `batch` and deliver the result to each sink.
    ///
    /// Batches without a profile frame, or without readings for the current
    /// person, publish nothing. A failing sink is logged and skipped.
    pub fn dispatch(&mut self, batch: &MeasurementBatch) -> DispatchReport {
        let aggregate = match aggregate(batch.as_slice()) {
            Ok(aggregate) => aggregate,
            Err(AggregateError::NoPersonInfo(count)) => {
                warn!(measurements = count, "no person profile received, nothing to publish");
                return DispatchReport::default();
            }
        };

        let mut report = DispatchReport {
            person: Some(aggregate.person()),
            readings: aggregate.len(),
            ..Default::default()
        };

        if aggregate.is_empty() {
            info!(person = aggregate.person(), "no readings for current person");
            return report;
        }

        let delivery = Delivery {
            batch,
            aggregate: &aggregate,
        };
        for sink in self.sinks.iter_mut() {
            match sink.deliver(&delivery) {
                Ok(()) => {
                    debug!(sink = sink.name(), "delivered");
                    report.delivered += 1;
                }
                Err(err) => {
                    warn!(sink = sink.name(), %err, "sink failed");
                    report.failed += 1;
                }
            }
        }

        info!(
            person = aggregate.person(),
            readings = report.readings,
            delivered = report.delivered,
            failed = report.failed,
            "published measurements"
        );
        report
    }
}
