//! InfluxDB line protocol output formatter.

use crate::measurement::Measurement;
use crate::output::{FormatError, OutputFormatter};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;

/// Field values for InfluxDB line protocol
#[derive(Debug, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Integer(i64),
    Boolean(bool),
    String(String),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FieldValue::Float(num) => write!(f, "{num}"),
            FieldValue::Integer(num) => write!(f, "{num}i"),
            FieldValue::Boolean(b) => write!(f, "{b}"),
            FieldValue::String(s) => write!(f, "\"{}\"", escape(s, &['"', '\\'])),
        }
    }
}

/// Backslash-escape `special` characters as line protocol requires.
fn escape(value: &str, special: &[char]) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if special.contains(&c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

const MEASUREMENT_SPECIAL: &[char] = &[',', ' '];
const KEY_SPECIAL: &[char] = &[',', '=', ' '];

/// Data point in InfluxDB line protocol
#[derive(Debug)]
pub struct DataPoint {
    pub measurement: String,
    pub tag_set: BTreeMap<String, String>,
    pub field_set: BTreeMap<String, FieldValue>,
    pub timestamp: Option<DateTime<Utc>>,
}

fn fmt_tags(data_point: &DataPoint, fmt: &mut fmt::Formatter) -> fmt::Result {
    for (key, value) in data_point.tag_set.iter() {
        write!(fmt, ",{}={}", escape(key, KEY_SPECIAL), escape(value, KEY_SPECIAL))?;
    }
    Ok(())
}

fn fmt_fields(data_point: &DataPoint, fmt: &mut fmt::Formatter) -> fmt::Result {
    let mut first = true;
    for (key, value) in data_point.field_set.iter() {
        if first {
            first = false;
        } else {
            write!(fmt, ",")?;
        }
        write!(fmt, "{}={}", escape(key, KEY_SPECIAL), value)?;
    }
    Ok(())
}

fn fmt_timestamp(data_point: &DataPoint, fmt: &mut fmt::Formatter) -> fmt::Result {
    // Times beyond the nanosecond range (year 2262) are written without timestamp.
    if let Some(nanos) = data_point.timestamp.and_then(|t| t.timestamp_nanos_opt()) {
        write!(fmt, " {}", nanos)?;
    }
    Ok(())
}

impl fmt::Display for DataPoint {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}", escape(&self.measurement, MEASUREMENT_SPECIAL))?;
        fmt_tags(self, fmt)?;
        write!(fmt, " ")?;
        fmt_fields(self, fmt)?;
        fmt_timestamp(self, fmt)
    }
}

/// InfluxDB line protocol formatter.
///
/// Every measurement becomes one point tagged with the person slot and the
/// measurement kind, timestamped with the reconstructed device time.
pub struct InfluxDbFormatter {
    /// The measurement name in InfluxDB
    measurement_name: String,
}

impl InfluxDbFormatter {
    pub fn new(measurement_name: String) -> Self {
        Self { measurement_name }
    }

    fn tag_set(&self, measurement: &Measurement) -> BTreeMap<String, String> {
        let mut tags = BTreeMap::new();
        tags.insert("person".to_string(), measurement.person().to_string());
        tags.insert("kind".to_string(), measurement.kind().to_string());
        tags
    }

    fn field_set(&self, measurement: &Measurement) -> BTreeMap<String, FieldValue> {
        let mut fields = BTreeMap::new();

        macro_rules! add {
            ($name:literal, $val:expr) => {
                fields.insert($name.into(), $val);
            };
        }

        match measurement {
            Measurement::Person(p) => {
                add!("gender", FieldValue::String(p.gender.as_str().into()));
                add!("age", FieldValue::Integer(i64::from(p.age)));
                add!("height", FieldValue::Integer(i64::from(p.height_cm)));
                add!("activity", FieldValue::String(p.activity.as_str().into()));
            }
            Measurement::Weight(w) => {
                add!("weight", FieldValue::Float(w.weight_kg));
                add!("stabilized", FieldValue::Boolean(w.stabilized));
                add!("impedance_measured", FieldValue::Boolean(w.impedance_measured));
            }
            Measurement::Body(b) => {
                add!("kcal", FieldValue::Integer(i64::from(b.kcal)));
                add!("fat", FieldValue::Float(b.fat_pct));
                add!("water", FieldValue::Float(b.water_pct));
                add!("muscle", FieldValue::Float(b.muscle_pct));
                add!("bone", FieldValue::Float(b.bone_pct));
            }
        }

        fields
    }

    pub fn to_data_point(&self, measurement: &Measurement) -> DataPoint {
        DataPoint {
            measurement: self.measurement_name.clone(),
            tag_set: self.tag_set(measurement),
            field_set: self.field_set(measurement),
            timestamp: measurement.timestamp(),
        }
    }
}

impl OutputFormatter for InfluxDbFormatter {
    fn format(&self, measurement: &Measurement) -> Result<String, FormatError> {
        Ok(self.to_data_point(measurement).to_string())
    }
}
