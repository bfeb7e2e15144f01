//! Bluetooth UUIDs for the Calypso Ultrasonic.
//!
//! The anemometer exposes 16-bit characteristics, expanded here onto the
//! Bluetooth base UUID (`0000xxxx-0000-1000-8000-00805f9b34fb`).

use uuid::{Uuid, uuid};

use crate::types::{CharacteristicRole, DeviceInfoKind};

// --- Ultrasonic configuration/state characteristics ---

/// Operating mode (read): 0 sleep, 1 low power, 2 normal.
pub const OPERATING_MODE: Uuid = uuid!("0000a001-0000-1000-8000-00805f9b34fb");

/// Output rate: written as a single byte (1, 4 or 8 Hz), read back as sampling speed.
pub const DATA_RATE: Uuid = uuid!("0000a002-0000-1000-8000-00805f9b34fb");

/// Compass / 9-DOF sensor: written as 0/1, read back as compass state.
pub const COMPASS: Uuid = uuid!("0000a003-0000-1000-8000-00805f9b34fb");

/// Wind angle offset (u16 LE). Writing is reserved and not used.
pub const ANGLE_OFFSET: Uuid = uuid!("0000a007-0000-1000-8000-00805f9b34fb");

/// Compass calibration state (read).
pub const CALIBRATION: Uuid = uuid!("0000a008-0000-1000-8000-00805f9b34fb");

/// Wind speed multiplier (f32 LE). Writing a speed correction is reserved and not used.
pub const WIND_SPEED_CORRECTION: Uuid = uuid!("0000a009-0000-1000-8000-00805f9b34fb");

/// Telemetry frames, delivered by notification.
pub const TELEMETRY: Uuid = uuid!("00002a39-0000-1000-8000-00805f9b34fb");

// --- Device Information characteristics ---

/// Model number string characteristic.
pub const MODEL_NUMBER: Uuid = uuid!("00002a24-0000-1000-8000-00805f9b34fb");

/// Serial number string characteristic.
pub const SERIAL_NUMBER: Uuid = uuid!("00002a25-0000-1000-8000-00805f9b34fb");

/// Firmware revision string characteristic.
pub const FIRMWARE_REVISION: Uuid = uuid!("00002a26-0000-1000-8000-00805f9b34fb");

/// Hardware revision string characteristic.
pub const HARDWARE_REVISION: Uuid = uuid!("00002a27-0000-1000-8000-00805f9b34fb");

/// Software revision string characteristic.
pub const SOFTWARE_REVISION: Uuid = uuid!("00002a28-0000-1000-8000-00805f9b34fb");

/// Manufacturer name string characteristic.
pub const MANUFACTURER_NAME: Uuid = uuid!("00002a29-0000-1000-8000-00805f9b34fb");

/// Roles carried by a characteristic identifier.
///
/// Configuration roles come before the state role they are read back as.
/// Unknown identifiers have no roles; they are still read once during
/// configuration but their value is ignored.
#[must_use]
pub fn roles_for(uuid: Uuid) -> &'static [CharacteristicRole] {
    use CharacteristicRole as R;

    match uuid {
        OPERATING_MODE => &[R::OperatingMode],
        DATA_RATE => &[R::RateConfig, R::SamplingSpeed],
        COMPASS => &[R::CompassConfig, R::CompassState],
        ANGLE_OFFSET => &[R::AngleOffsetConfig, R::AngleOffsetState],
        CALIBRATION => &[R::CalibrationState],
        WIND_SPEED_CORRECTION => &[R::SpeedCorrectionConfig, R::WindSpeedMultiplier],
        TELEMETRY => &[R::TelemetryNotify],
        MANUFACTURER_NAME => &[R::DeviceInfo(DeviceInfoKind::Manufacturer)],
        MODEL_NUMBER => &[R::DeviceInfo(DeviceInfoKind::Model)],
        SERIAL_NUMBER => &[R::DeviceInfo(DeviceInfoKind::SerialNumber)],
        HARDWARE_REVISION => &[R::DeviceInfo(DeviceInfoKind::HardwareRevision)],
        FIRMWARE_REVISION => &[R::DeviceInfo(DeviceInfoKind::FirmwareRevision)],
        SOFTWARE_REVISION => &[R::DeviceInfo(DeviceInfoKind::SoftwareRevision)],
        _ => &[],
    }
}
