//! Core types for Ultrasonic data.

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{ParseError, ParseResult};

/// Semantic role of a characteristic exposed by the anemometer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum CharacteristicRole {
    /// Output rate setting (written as 1, 4 or 8 Hz).
    RateConfig,
    /// Compass / 9-DOF enable setting (written as 0 or 1).
    CompassConfig,
    /// Wind angle offset setting. Reserved, never written.
    AngleOffsetConfig,
    /// Wind speed correction setting. Reserved, never written.
    SpeedCorrectionConfig,
    /// Current operating mode.
    OperatingMode,
    /// Current sampling speed.
    SamplingSpeed,
    /// Whether the compass is currently enabled.
    CompassState,
    /// Current wind angle offset.
    AngleOffsetState,
    /// Whether a compass calibration is running.
    CalibrationState,
    /// Current wind speed multiplier.
    WindSpeedMultiplier,
    /// Telemetry frame notifications.
    TelemetryNotify,
    /// One of the standard Device Information strings.
    DeviceInfo(DeviceInfoKind),
}

impl CharacteristicRole {
    /// Whether this role is a write-only configuration role.
    #[must_use]
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::RateConfig
                | Self::CompassConfig
                | Self::AngleOffsetConfig
                | Self::SpeedCorrectionConfig
        )
    }
}

/// Kind of a device information record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum DeviceInfoKind {
    Manufacturer,
    Model,
    SerialNumber,
    HardwareRevision,
    FirmwareRevision,
    SoftwareRevision,
    OperatingMode,
    SamplingSpeed,
    CompassState,
    WindAngleOffset,
    Calibration,
    WindSpeedMultiplier,
}

impl DeviceInfoKind {
    /// Human-readable label for the record.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Manufacturer => "Manufacturer",
            Self::Model => "Model",
            Self::SerialNumber => "Serial number",
            Self::HardwareRevision => "HW revision",
            Self::FirmwareRevision => "FW revision",
            Self::SoftwareRevision => "SW revision",
            Self::OperatingMode => "Operating mode",
            Self::SamplingSpeed => "Sampling speed",
            Self::CompassState => "Compass state",
            Self::WindAngleOffset => "Wind angle offset",
            Self::Calibration => "Calibration",
            Self::WindSpeedMultiplier => "Wind speed multiplier",
        }
    }
}

impl fmt::Display for DeviceInfoKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Value of a device information record.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
pub enum InfoValue {
    Text(String),
    Number(f64),
}

impl fmt::Display for InfoValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InfoValue::Text(s) => f.write_str(s),
            InfoValue::Number(n) => write!(f, "{}", n),
        }
    }
}

/// A single piece of device information produced by a one-shot read.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DeviceInfoRecord {
    pub kind: DeviceInfoKind,
    pub value: InfoValue,
}

impl DeviceInfoRecord {
    /// Create a text record.
    pub fn text(kind: DeviceInfoKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: InfoValue::Text(value.into()),
        }
    }

    /// Create a numeric record.
    pub fn number(kind: DeviceInfoKind, value: impl Into<f64>) -> Self {
        Self {
            kind,
            value: InfoValue::Number(value.into()),
        }
    }
}

impl fmt::Display for DeviceInfoRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.value)
    }
}

/// Operating mode reported by the anemometer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum OperatingMode {
    Sleep = 0,
    LowPower = 1,
    #[default]
    Normal = 2,
}

impl TryFrom<u8> for OperatingMode {
    type Error = ParseError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(OperatingMode::Sleep),
            1 => Ok(OperatingMode::LowPower),
            2 => Ok(OperatingMode::Normal),
            _ => Err(ParseError::InvalidValue(format!(
                "unknown operating mode {}",
                value
            ))),
        }
    }
}

impl fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperatingMode::Sleep => write!(f, "SLEEP_MODE"),
            OperatingMode::LowPower => write!(f, "LOW_POWER_MODE"),
            OperatingMode::Normal => write!(f, "NORMAL_MODE"),
        }
    }
}

/// Live snapshot of the device's own state, as last read back from it.
///
/// This is distinct from the configured options: a configured compass setting
/// only becomes visible here once the compass state has been read.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DeviceState {
    pub mode: OperatingMode,
    pub sampling_speed: u8,
    pub compass_enabled: bool,
    pub wind_angle_offset: u16,
    pub calibrating: bool,
    pub wind_speed_multiplier: f32,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            mode: OperatingMode::Normal,
            sampling_speed: 4,
            compass_enabled: false,
            wind_angle_offset: 0,
            calibrating: false,
            wind_speed_multiplier: 0.0,
        }
    }
}

impl DeviceState {
    /// Interpret a characteristic read for `role`, updating the snapshot.
    ///
    /// Returns the device information record to publish, if the role has one.
    /// Configuration roles and the telemetry role produce no record.
    pub fn apply_read(
        &mut self,
        role: CharacteristicRole,
        data: &[u8],
    ) -> ParseResult<Option<DeviceInfoRecord>> {
        use bytes::Buf;

        fn require(data: &[u8], expected: usize) -> ParseResult<()> {
            if data.len() < expected {
                return Err(ParseError::InvalidLength {
                    expected,
                    actual: data.len(),
                });
            }
            Ok(())
        }

        let mut buf = data;
        let record = match role {
            CharacteristicRole::DeviceInfo(kind) => {
                let text = String::from_utf8_lossy(data)
                    .trim_end_matches('\0')
                    .to_string();
                DeviceInfoRecord::text(kind, text)
            }
            CharacteristicRole::OperatingMode => {
                require(data, 1)?;
                let raw = buf.get_u8();
                // Unknown modes are still reported; the last known mode stays.
                if let Ok(mode) = OperatingMode::try_from(raw) {
                    self.mode = mode;
                }
                DeviceInfoRecord::number(DeviceInfoKind::OperatingMode, raw)
            }
            CharacteristicRole::SamplingSpeed => {
                require(data, 1)?;
                self.sampling_speed = buf.get_u8();
                DeviceInfoRecord::number(DeviceInfoKind::SamplingSpeed, self.sampling_speed)
            }
            CharacteristicRole::CompassState => {
                require(data, 1)?;
                let raw = buf.get_u8();
                self.compass_enabled = raw != 0;
                DeviceInfoRecord::number(DeviceInfoKind::CompassState, raw)
            }
            CharacteristicRole::AngleOffsetState => {
                require(data, 2)?;
                self.wind_angle_offset = buf.get_u16_le();
                DeviceInfoRecord::number(DeviceInfoKind::WindAngleOffset, self.wind_angle_offset)
            }
            CharacteristicRole::CalibrationState => {
                require(data, 1)?;
                let raw = buf.get_u8();
                self.calibrating = raw == 1;
                DeviceInfoRecord::number(DeviceInfoKind::Calibration, raw)
            }
            CharacteristicRole::WindSpeedMultiplier => {
                require(data, 4)?;
                self.wind_speed_multiplier = buf.get_f32_le();
                DeviceInfoRecord::number(
                    DeviceInfoKind::WindSpeedMultiplier,
                    self.wind_speed_multiplier,
                )
            }
            CharacteristicRole::RateConfig
            | CharacteristicRole::CompassConfig
            | CharacteristicRole::AngleOffsetConfig
            | CharacteristicRole::SpeedCorrectionConfig
            | CharacteristicRole::TelemetryNotify => return Ok(None),
        };

        Ok(Some(record))
    }
}

/// Roll, pitch and magnetic heading from the 9-DOF sensor, in radians.
///
/// These only exist as a group: either the compass was enabled when the
/// frame was decoded and all three are known, or none of them is.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Attitude {
    pub roll: f64,
    pub pitch: f64,
    pub heading_magnetic: f64,
}

/// A normalized observation decoded from one telemetry frame.
///
/// All values are SI: metres per second, radians, Kelvin and a
/// 0..1 state-of-charge fraction.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Observation {
    /// Apparent wind speed in m/s.
    pub wind_speed_apparent: f64,
    /// Apparent wind angle in radians.
    pub wind_angle_apparent: f64,
    /// Battery state of charge, rounded to two decimals.
    pub battery_state_of_charge: f64,
    /// Outside temperature in Kelvin.
    pub outside_temperature: f64,
    /// Attitude, present only while the compass is enabled.
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub attitude: Option<Attitude>,
    /// Wall-clock instant the frame was decoded.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub timestamp: time::OffsetDateTime,
}

impl Observation {
    /// Roll in radians, if the compass was enabled.
    #[must_use]
    pub fn roll(&self) -> Option<f64> {
        self.attitude.map(|a| a.roll)
    }

    /// Pitch in radians, if the compass was enabled.
    #[must_use]
    pub fn pitch(&self) -> Option<f64> {
        self.attitude.map(|a| a.pitch)
    }

    /// Magnetic heading in radians, if the compass was enabled.
    #[must_use]
    pub fn heading_magnetic(&self) -> Option<f64> {
        self.attitude.map(|a| a.heading_magnetic)
    }

    /// Compare two observations ignoring their timestamps.
    #[must_use]
    pub fn same_values(&self, other: &Observation) -> bool {
        self.wind_speed_apparent == other.wind_speed_apparent
            && self.wind_angle_apparent == other.wind_angle_apparent
            && self.battery_state_of_charge == other.battery_state_of_charge
            && self.outside_temperature == other.outside_temperature
            && self.attitude == other.attitude
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operating_mode_from_u8() {
        assert_eq!(OperatingMode::try_from(0), Ok(OperatingMode::Sleep));
        assert_eq!(OperatingMode::try_from(1), Ok(OperatingMode::LowPower));
        assert_eq!(OperatingMode::try_from(2), Ok(OperatingMode::Normal));
        assert!(OperatingMode::try_from(3).is_err());
    }

    #[test]
    fn test_operating_mode_display() {
        assert_eq!(OperatingMode::Sleep.to_string(), "SLEEP_MODE");
        assert_eq!(OperatingMode::Normal.to_string(), "NORMAL_MODE");
    }

    #[test]
    fn test_device_state_defaults() {
        let state = DeviceState::default();
        assert_eq!(state.mode, OperatingMode::Normal);
        assert_eq!(state.sampling_speed, 4);
        assert!(!state.compass_enabled);
        assert!(!state.calibrating);
    }

    #[test]
    fn test_apply_compass_state_read() {
        let mut state = DeviceState::default();

        let record = state
            .apply_read(CharacteristicRole::CompassState, &[1])
            .unwrap()
            .unwrap();
        assert!(state.compass_enabled);
        assert_eq!(record.kind, DeviceInfoKind::CompassState);
        assert_eq!(record.value, InfoValue::Number(1.0));

        state
            .apply_read(CharacteristicRole::CompassState, &[0])
            .unwrap();
        assert!(!state.compass_enabled);
    }

    #[test]
    fn test_apply_unknown_operating_mode_read() {
        let mut state = DeviceState::default();
        state
            .apply_read(CharacteristicRole::OperatingMode, &[1])
            .unwrap();
        assert_eq!(state.mode, OperatingMode::LowPower);

        let record = state
            .apply_read(CharacteristicRole::OperatingMode, &[7])
            .unwrap()
            .unwrap();
        assert_eq!(record.kind, DeviceInfoKind::OperatingMode);
        assert_eq!(record.value, InfoValue::Number(7.0));
        assert_eq!(state.mode, OperatingMode::LowPower);
    }

    #[test]
    fn test_apply_device_info_read_strips_nul() {
        let mut state = DeviceState::default();
        let record = state
            .apply_read(
                CharacteristicRole::DeviceInfo(DeviceInfoKind::Manufacturer),
                b"Calypso Instruments\0\0",
            )
            .unwrap()
            .unwrap();
        assert_eq!(
            record,
            DeviceInfoRecord::text(DeviceInfoKind::Manufacturer, "Calypso Instruments")
        );
        assert_eq!(record.to_string(), "Manufacturer: Calypso Instruments");
    }

    #[test]
    fn test_apply_wind_speed_multiplier_read() {
        let mut state = DeviceState::default();
        let record = state
            .apply_read(
                CharacteristicRole::WindSpeedMultiplier,
                &1.5f32.to_le_bytes(),
            )
            .unwrap()
            .unwrap();
        assert!((state.wind_speed_multiplier - 1.5).abs() < f32::EPSILON);
        assert_eq!(record.value, InfoValue::Number(1.5));
    }

    #[test]
    fn test_apply_angle_offset_read() {
        let mut state = DeviceState::default();
        state
            .apply_read(CharacteristicRole::AngleOffsetState, &[0x2C, 0x01])
            .unwrap();
        assert_eq!(state.wind_angle_offset, 300);
    }

    #[test]
    fn test_apply_read_too_short() {
        let mut state = DeviceState::default();
        let err = state
            .apply_read(CharacteristicRole::WindSpeedMultiplier, &[0x00, 0x01])
            .unwrap_err();
        assert_eq!(
            err,
            ParseError::InvalidLength {
                expected: 4,
                actual: 2
            }
        );
        assert_eq!(state.wind_speed_multiplier, 0.0);
    }

    #[test]
    fn test_apply_read_config_roles_produce_nothing() {
        let mut state = DeviceState::default();
        assert_eq!(
            state.apply_read(CharacteristicRole::RateConfig, &[8]).unwrap(),
            None
        );
        assert_eq!(
            state
                .apply_read(CharacteristicRole::TelemetryNotify, &[0; 10])
                .unwrap(),
            None
        );
        assert_eq!(state, DeviceState::default());
    }

    #[test]
    fn test_config_roles() {
        assert!(CharacteristicRole::RateConfig.is_config());
        assert!(CharacteristicRole::SpeedCorrectionConfig.is_config());
        assert!(!CharacteristicRole::SamplingSpeed.is_config());
        assert!(!CharacteristicRole::TelemetryNotify.is_config());
    }
}
