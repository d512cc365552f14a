//! Reduce a session's measurement batch to the readings worth publishing.
//!
//! The scale replays its stored history for every profile on each
//! connection. The person standing on the scale is identified by the last
//! profile frame that arrived; only that person's readings are kept, and of
//! those only the most recently *arrived* one per kind. Embedded device
//! timestamps play no part in the selection.

use crate::measurement::{Measurement, MeasurementKind, PersonId};
use std::collections::BTreeMap;
use thiserror::Error;

/// Identifies one published reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AggregationKey {
    pub person: PersonId,
    pub kind: MeasurementKind,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AggregateError {
    /// Without a profile frame the current person is unknown.
    #[error("no person profile in batch of {0} measurements")]
    NoPersonInfo(usize),
}

/// Latest reading per kind for the person currently on the scale.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    person: PersonId,
    readings: BTreeMap<AggregationKey, Measurement>,
}

impl Aggregate {
    /// The person identified by the last profile frame.
    pub fn person(&self) -> PersonId {
        self.person
    }

    pub fn get(&self, kind: MeasurementKind) -> Option<&Measurement> {
        self.readings.get(&AggregationKey {
            person: self.person,
            kind,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    /// Readings in key order (weight before body composition).
    pub fn readings(&self) -> impl Iterator<Item = (&AggregationKey, &Measurement)> {
        self.readings.iter()
    }
}

/// Build the [`Aggregate`] for a batch.
///
/// # Errors
/// [`AggregateError::NoPersonInfo`] when the batch holds no profile frame;
/// nothing should be published in that case.
pub fn aggregate(batch: &[Measurement]) -> Result<Aggregate, AggregateError> {
    let person = batch
        .iter()
        .rev()
        .find_map(|m| match m {
            Measurement::Person(info) => Some(info.person),
            _ => None,
        })
        .ok_or(AggregateError::NoPersonInfo(batch.len()))?;

    let mut readings = BTreeMap::new();
    for m in batch {
        if m.person() != person || m.kind() == MeasurementKind::Person {
            continue;
        }
        let key = AggregationKey {
            person,
            kind: m.kind(),
        };
        readings.insert(key, m.clone());
    }

    Ok(Aggregate { person, readings })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{body, person, weight};

    #[test]
    fn test_last_person_wins() {
        let w = weight(2, 7500, 10);
        let batch = vec![person(1), person(2), w.clone()];

        let result = aggregate(&batch).unwrap();
        assert_eq!(result.person(), 2);
        assert_eq!(result.len(), 1);
        assert_eq!(result.get(MeasurementKind::Weight), Some(&w));
        assert!(
            result
                .readings()
                .all(|(key, _)| key.person == 2 && key.kind != MeasurementKind::Person)
        );
    }

    #[test]
    fn test_latest_arrival_wins_over_timestamp() {
        let a = weight(1, 8000, 1_000_000);
        let b = weight(1, 7900, 10);
        let batch = vec![person(1), a, b.clone()];

        let result = aggregate(&batch).unwrap();
        assert_eq!(result.get(MeasurementKind::Weight), Some(&b));
    }

    #[test]
    fn test_other_persons_discarded() {
        let own_body = body(3, 5);
        let batch = vec![
            weight(1, 7000, 1),
            body(1, 1),
            person(3),
            weight(2, 6000, 2),
            own_body.clone(),
        ];

        let result = aggregate(&batch).unwrap();
        assert_eq!(result.person(), 3);
        assert_eq!(result.len(), 1);
        assert_eq!(result.get(MeasurementKind::Body), Some(&own_body));
        assert_eq!(result.get(MeasurementKind::Weight), None);
    }

    #[test]
    fn test_readings_before_profile_frame_count() {
        // History replay may precede the profile frame.
        let w = weight(4, 6500, 3);
        let b = body(4, 3);
        let batch = vec![w.clone(), b.clone(), person(4)];

        let result = aggregate(&batch).unwrap();
        assert_eq!(result.get(MeasurementKind::Weight), Some(&w));
        assert_eq!(result.get(MeasurementKind::Body), Some(&b));
    }

    #[test]
    fn test_no_person_info() {
        let batch = vec![weight(1, 7000, 1)];
        assert_eq!(aggregate(&batch), Err(AggregateError::NoPersonInfo(1)));
        assert_eq!(aggregate(&[]), Err(AggregateError::NoPersonInfo(0)));
    }

    #[test]
    fn test_profile_only_batch_is_empty() {
        let result = aggregate(&[person(1)]).unwrap();
        assert!(result.is_empty());
        assert_eq!(result.person(), 1);
    }
}
