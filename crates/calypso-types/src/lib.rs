//! Platform-agnostic types for the Calypso Ultrasonic BLE anemometer.
//!
//! This crate holds everything that does not need a Bluetooth stack:
//!
//! - The normalized [`Observation`] model and its [`Attitude`] group
//! - Telemetry frame decoding ([`frame::decode`])
//! - Device information records and the live [`DeviceState`] snapshot
//! - UUID constants and the characteristic role table
//! - Error types for payload parsing
//!
//! # Example
//!
//! ```
//! use calypso_types::frame;
//!
//! let raw = [0xE8, 0x03, 0x2C, 0x01, 0x0A, 0x96, 0x3C, 0x3C, 0xF0, 0x00];
//! let observation = frame::decode(&raw, false).unwrap();
//! assert_eq!(observation.wind_speed_apparent, 10.0);
//! assert!(observation.attitude.is_none());
//! ```

pub mod error;
pub mod frame;
pub mod types;
pub mod uuid;

pub use error::{ParseError, ParseResult};
pub use frame::FRAME_LEN;
pub use types::{
    Attitude, CharacteristicRole, DeviceInfoKind, DeviceInfoRecord, DeviceState, InfoValue,
    Observation, OperatingMode,
};
pub use uuid as uuids;
