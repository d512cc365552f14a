//! Scale measurement data structures.
//!
//! Units follow the scale's own conventions:
//! - Weight in kilograms
//! - Height in centimetres
//! - Fat, water, muscle and bone as percentages of body weight
//! - Energy expenditure in kcal
//!
//! The serde representation is the JSON payload published per measurement,
//! tagged with `type` and using the field names of the scale's companion
//! tooling (`size` for height, `tbw` for total body water).

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// User profile slot identifier on the scale (1-8 on BS440-family devices).
pub type PersonId = u8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Activity {
    High,
    Normal,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
        }
    }
}

impl Activity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Activity::High => "high",
            Activity::Normal => "normal",
        }
    }
}

/// Profile of the person currently standing on the scale.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PersonInfo {
    pub person: PersonId,
    pub gender: Gender,
    pub age: u8,
    #[serde(rename = "size")]
    pub height_cm: u8,
    pub activity: Activity,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeightReading {
    pub person: PersonId,
    #[serde(rename = "weight")]
    pub weight_kg: f64,
    /// The scale settled on this value.
    pub stabilized: bool,
    /// Bio-impedance was measured alongside the weight.
    pub impedance_measured: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BodyComposition {
    pub person: PersonId,
    pub timestamp: DateTime<Utc>,
    pub kcal: u16,
    #[serde(rename = "fat")]
    pub fat_pct: f64,
    #[serde(rename = "tbw")]
    pub water_pct: f64,
    #[serde(rename = "muscle")]
    pub muscle_pct: f64,
    #[serde(rename = "bone")]
    pub bone_pct: f64,
}

/// A single decoded notification from the scale.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum Measurement {
    #[serde(rename = "person")]
    Person(PersonInfo),
    #[serde(rename = "weight")]
    Weight(WeightReading),
    #[serde(rename = "body")]
    Body(BodyComposition),
}

/// Discriminant of [`Measurement`], used as part of the aggregation key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MeasurementKind {
    Person,
    Weight,
    Body,
}

impl MeasurementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MeasurementKind::Person => "person",
            MeasurementKind::Weight => "weight",
            MeasurementKind::Body => "body",
        }
    }
}

impl fmt::Display for MeasurementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Measurement {
    pub fn person(&self) -> PersonId {
        match self {
            Measurement::Person(p) => p.person,
            Measurement::Weight(w) => w.person,
            Measurement::Body(b) => b.person,
        }
    }

    pub fn kind(&self) -> MeasurementKind {
        match self {
            Measurement::Person(_) => MeasurementKind::Person,
            Measurement::Weight(_) => MeasurementKind::Weight,
            Measurement::Body(_) => MeasurementKind::Body,
        }
    }

    /// Device time of the reading; profile frames carry none.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Measurement::Person(_) => None,
            Measurement::Weight(w) => Some(w.timestamp),
            Measurement::Body(b) => Some(b.timestamp),
        }
    }
}

/// Measurements collected during one session, in arrival order.
///
/// Arrival order is the only trustworthy recency signal: device timestamps
/// can be corrupted, so the batch is never re-sorted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeasurementBatch {
    measurements: Vec<Measurement>,
}

impl MeasurementBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, measurement: Measurement) {
        self.measurements.push(measurement);
    }

    pub fn clear(&mut self) {
        self.measurements.clear();
    }

    pub fn len(&self) -> usize {
        self.measurements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.measurements.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Measurement> {
        self.measurements.iter()
    }

    pub fn as_slice(&self) -> &[Measurement] {
        &self.measurements
    }
}

impl From<Vec<Measurement>> for MeasurementBatch {
    fn from(measurements: Vec<Measurement>) -> Self {
        Self { measurements }
    }
}

impl FromIterator<Measurement> for MeasurementBatch {
    fn from_iter<T: IntoIterator<Item = Measurement>>(iter: T) -> Self {
        Self {
            measurements: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a MeasurementBatch {
    type Item = &'a Measurement;
    type IntoIter = std::slice::Iter<'a, Measurement>;

    fn into_iter(self) -> Self::IntoIter {
        self.measurements.iter()
    }
}
