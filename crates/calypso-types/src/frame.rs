//! Telemetry frame decoding.
//!
//! The anemometer notifies a fixed 10-byte little-endian frame:
//!
//! | Offset | Type | Field                                  |
//! |--------|------|----------------------------------------|
//! | 0..2   | u16  | wind speed, hundredths of m/s          |
//! | 2..4   | u16  | apparent wind angle, degrees           |
//! | 4      | u8   | battery, tens of percent               |
//! | 5      | u8   | temperature, °C + 100                  |
//! | 6      | u8   | roll, degrees + 90                     |
//! | 7      | u8   | pitch, degrees + 90                    |
//! | 8..10  | u16  | heading, degrees as `360 - heading`    |
//!
//! Roll, pitch and heading are only meaningful while the 9-DOF compass is
//! enabled; otherwise the decoder leaves the attitude out.

use std::f64::consts::PI;

use bytes::Buf;
use time::OffsetDateTime;

use crate::error::{ParseError, ParseResult};
use crate::types::{Attitude, Observation};

/// Exact size of a telemetry frame.
pub const FRAME_LEN: usize = 10;

const KELVIN_OFFSET: f64 = 273.15;

/// Decode a telemetry frame, stamping it with the current wall-clock time.
pub fn decode(data: &[u8], compass_enabled: bool) -> ParseResult<Observation> {
    decode_at(data, compass_enabled, OffsetDateTime::now_utc())
}

/// Decode a telemetry frame with an explicit timestamp.
pub fn decode_at(
    data: &[u8],
    compass_enabled: bool,
    timestamp: OffsetDateTime,
) -> ParseResult<Observation> {
    if data.len() != FRAME_LEN {
        return Err(ParseError::InvalidLength {
            expected: FRAME_LEN,
            actual: data.len(),
        });
    }

    let mut buf = data;
    let speed_raw = buf.get_u16_le();
    let angle_raw = buf.get_u16_le();
    let battery_raw = buf.get_u8();
    let temperature_raw = buf.get_u8();
    let roll_raw = buf.get_u8();
    let pitch_raw = buf.get_u8();
    let heading_raw = buf.get_u16_le();

    let attitude = compass_enabled.then(|| Attitude {
        roll: radians(f64::from(roll_raw) - 90.0),
        pitch: radians(f64::from(pitch_raw) - 90.0),
        heading_magnetic: radians(360.0 - f64::from(heading_raw)),
    });

    Ok(Observation {
        wind_speed_apparent: f64::from(speed_raw) / 100.0,
        wind_angle_apparent: radians(f64::from(angle_raw)),
        battery_state_of_charge: round2(f64::from(battery_raw) * 10.0 / 100.0),
        outside_temperature: f64::from(temperature_raw) - 100.0 + KELVIN_OFFSET,
        attitude,
        timestamp,
    })
}

/// `degrees × π / 180`, in that order.
fn radians(degrees: f64) -> f64 {
    degrees * PI / 180.0
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
