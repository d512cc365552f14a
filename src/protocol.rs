//! Medisana BS440-family GATT protocol.
//!
//! The scale exposes one vendor service. Every characteristic on it that
//! supports indications delivers measurement frames; a separate command
//! characteristic accepts the start and time-sync commands.
//!
//! Notification frames are fixed-layout and dispatched on their first byte:
//!
//! | Opcode | Frame           | Minimum length |
//! |--------|-----------------|----------------|
//! | `0x84` | person profile  | 9              |
//! | `0x1D` | weight          | 14             |
//! | `0x6F` | body composition| 16             |
//!
//! Multi-byte integers are little-endian. Device time counts seconds since
//! 2010-01-01 UTC ([`ERA_OFFSET`]).

use crate::measurement::{
    Activity, BodyComposition, Gender, Measurement, PersonInfo, WeightReading,
};
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, trace, warn};
use uuid::Uuid;

/// Vendor service carrying measurement indications and the command characteristic.
pub const MEASUREMENT_SERVICE: Uuid = Uuid::from_u128(0x000078b2_0000_1000_8000_00805f9b34fb);

/// Characteristic accepting [`START_COMMAND`] and time-sync commands.
pub const COMMAND_CHARACTERISTIC: Uuid = Uuid::from_u128(0x00008a81_0000_1000_8000_00805f9b34fb);

/// Client characteristic configuration value enabling indications.
pub const ENABLE_INDICATION: [u8; 2] = [0x02, 0x00];

/// Puts the scale into measurement transfer mode.
pub const START_COMMAND: u8 = 0x01;

/// Prefix of the time-sync command.
pub const TIME_SYNC_OPCODE: u8 = 0x02;

/// Unix time of the scale's time zero (2010-01-01T00:00:00Z).
pub const ERA_OFFSET: i64 = 1_262_304_000;

/// Upper bound of a representable Unix time during timestamp reconstruction.
pub const TIMESTAMP_LIMIT: i64 = i64::MAX;

pub const OPCODE_PERSON: u8 = 0x84;
pub const OPCODE_WEIGHT: u8 = 0x1D;
pub const OPCODE_BODY: u8 = 0x6F;

pub const PERSON_FRAME_LEN: usize = 9;
pub const WEIGHT_FRAME_LEN: usize = 14;
pub const BODY_FRAME_LEN: usize = 16;

const GENDER_MALE: u8 = 1;
const ACTIVITY_HIGH: u8 = 3;
const STATUS_STABILIZED: u8 = 0x01;
const STATUS_IMPEDANCE: u8 = 0x02;
const COMPOSITION_MASK: u16 = 0x0FFF;

/// Reasons a notification frame does not yield a measurement.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("empty frame")]
    Empty,
    #[error("unknown opcode 0x{0:02x}")]
    UnknownOpcode(u8),
    #[error("frame 0x{opcode:02x} too short: {len} bytes, need {required}")]
    TooShort {
        opcode: u8,
        len: usize,
        required: usize,
    },
}

/// Decode a notification payload, logging and discarding anything unusable.
///
/// Unknown opcodes and truncated frames are expected traffic and only
/// surface at debug level.
pub fn decode(data: &[u8]) -> Option<Measurement> {
    match decode_frame(data) {
        Ok(measurement) => Some(measurement),
        Err(err) => {
            debug!(frame = %hex::encode(data), %err, "ignoring frame");
            None
        }
    }
}

/// Decode a notification payload into a [`Measurement`].
pub fn decode_frame(data: &[u8]) -> Result<Measurement, DecodeError> {
    let Some(&opcode) = data.first() else {
        return Err(DecodeError::Empty);
    };
    trace!(frame = %hex::encode(data), "decoding frame");

    match opcode {
        OPCODE_PERSON => {
            require_len(data, PERSON_FRAME_LEN)?;
            Ok(decode_person(data))
        }
        OPCODE_WEIGHT => {
            require_len(data, WEIGHT_FRAME_LEN)?;
            Ok(decode_weight(data))
        }
        OPCODE_BODY => {
            require_len(data, BODY_FRAME_LEN)?;
            Ok(decode_body(data))
        }
        other => Err(DecodeError::UnknownOpcode(other)),
    }
}

fn require_len(data: &[u8], required: usize) -> Result<(), DecodeError> {
    if data.len() < required {
        return Err(DecodeError::TooShort {
            opcode: data[0],
            len: data.len(),
            required,
        });
    }
    Ok(())
}

// Callers have checked the frame length.
fn u16_le(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

fn u32_le(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

fn composition_pct(raw: u16) -> f64 {
    f64::from(raw & COMPOSITION_MASK) / 10.0
}

fn decode_person(data: &[u8]) -> Measurement {
    Measurement::Person(PersonInfo {
        person: data[2],
        gender: if data[4] == GENDER_MALE {
            Gender::Male
        } else {
            Gender::Female
        },
        age: data[5],
        height_cm: data[6],
        activity: if data[8] == ACTIVITY_HIGH {
            Activity::High
        } else {
            Activity::Normal
        },
    })
}

fn decode_weight(data: &[u8]) -> Measurement {
    let status = data[3];
    Measurement::Weight(WeightReading {
        person: data[13],
        weight_kg: f64::from(u16_le(data, 1)) / 100.0,
        stabilized: status & STATUS_STABILIZED != 0,
        impedance_measured: status & STATUS_IMPEDANCE != 0,
        timestamp: device_timestamp(u32_le(data, 5)),
    })
}

fn decode_body(data: &[u8]) -> Measurement {
    Measurement::Body(BodyComposition {
        timestamp: device_timestamp(u32_le(data, 1)),
        person: data[5],
        kcal: u16_le(data, 6),
        fat_pct: composition_pct(u16_le(data, 8)),
        water_pct: composition_pct(u16_le(data, 10)),
        muscle_pct: composition_pct(u16_le(data, 12)),
        bone_pct: composition_pct(u16_le(data, 14)),
    })
}

/// Map a raw device time onto Unix time.
///
/// The offset is applied when the sum stays below [`TIMESTAMP_LIMIT`];
/// otherwise the raw value is used as-is, and a raw value at or beyond the
/// limit collapses to the epoch.
pub fn reconstruct_unix_time(raw: u32) -> i64 {
    let raw = i64::from(raw);
    let mut unix = match raw.checked_add(ERA_OFFSET) {
        Some(sum) if sum < TIMESTAMP_LIMIT => sum,
        _ => raw,
    };
    if raw >= TIMESTAMP_LIMIT {
        unix = 0;
    }
    unix
}

/// Calendar time for a raw device timestamp.
///
/// A value chrono cannot represent falls back to the current time for this
/// measurement only.
pub fn device_timestamp(raw: u32) -> DateTime<Utc> {
    let unix = reconstruct_unix_time(raw);
    match DateTime::from_timestamp(unix, 0) {
        Some(timestamp) => timestamp,
        None => {
            warn!(raw, unix, "device timestamp out of range, using current time");
            Utc::now()
        }
    }
}

/// Time-sync command for the given wall-clock Unix time.
///
/// Layout: [`TIME_SYNC_OPCODE`] followed by `now - ERA_OFFSET` as `u32` LE.
/// Times before the device era clamp to zero.
pub fn time_sync_command(now_unix: i64) -> [u8; 5] {
    let device_time = u32::try_from(now_unix.saturating_sub(ERA_OFFSET).max(0)).unwrap_or(u32::MAX);
    let [a, b, c, d] = device_time.to_le_bytes();
    [TIME_SYNC_OPCODE, a, b, c, d]
}
