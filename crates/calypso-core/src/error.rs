//! Error types for calypso-core.
//!
//! This module defines the errors that can occur while talking to the
//! Ultrasonic over Bluetooth Low Energy.
//!
//! # How the driver treats errors
//!
//! The driver never surfaces an [`Error`] to the host directly. The session
//! task turns every failure into a status event and decides what happens next:
//!
//! | Error | Where it shows up | Driver reaction |
//! |-------|-------------------|-----------------|
//! | [`Error::Bluetooth`] | scan, discovery, read, subscribe | depends on the call (see below) |
//! | [`Error::Timeout`] | discovery, read, write | same as the call failing |
//! | [`Error::ConnectionFailed`] | connect | retry with backoff |
//! | [`Error::DeviceNotFound`] | connect, adapter lookup | retry with backoff |
//! | [`Error::WriteFailed`] | config writes | reported, pass continues |
//! | [`Error::CharacteristicNotFound`] | read, write, subscribe | reported, pass continues |
//! | [`Error::InvalidFrame`] | telemetry | frame dropped |
//! | [`Error::InvalidData`] | state reads | value ignored |
//! | [`Error::InvalidConfig`] | `start()` | session is not started |
//!
//! A failed scan start is left to the search timeout. A failed connect, a
//! search timeout and a dropped link all force a retry. A failed write, read
//! or subscribe is reported and the link stays up.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur when communicating with the Ultrasonic.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Bluetooth Low Energy error.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Device or adapter not found.
    #[error("Device not found: {0}")]
    DeviceNotFound(DeviceNotFoundReason),

    /// Operation attempted on a peripheral that is not connected.
    #[error("Not connected to device")]
    NotConnected,

    /// Required BLE characteristic not found on the peripheral.
    #[error("Characteristic not found: {uuid}")]
    CharacteristicNotFound {
        /// The UUID that was not found.
        uuid: String,
    },

    /// A characteristic value could not be interpreted.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// A telemetry frame had the wrong size.
    #[error("Invalid telemetry frame: expected {expected} bytes, got {actual}")]
    InvalidFrame {
        /// Required frame size.
        expected: usize,
        /// Actual frame size received.
        actual: usize,
    },

    /// Operation timed out.
    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The timeout duration.
        duration: Duration,
    },

    /// Connection failed with specific reason.
    #[error("Connection failed: {reason}")]
    ConnectionFailed {
        /// The peripheral that failed to connect.
        device_id: Option<String>,
        /// The structured reason for the failure.
        reason: ConnectionFailureReason,
    },

    /// Write operation failed.
    #[error("Write failed to characteristic {uuid}: {reason}")]
    WriteFailed {
        /// The characteristic UUID.
        uuid: String,
        /// The reason for the failure.
        reason: String,
    },

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Structured reasons for connection failures.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConnectionFailureReason {
    /// Connection attempt timed out.
    Timeout(Duration),
    /// Generic BLE error.
    BleError(String),
    /// Other/unknown error.
    Other(String),
}

impl std::fmt::Display for ConnectionFailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout(duration) => write!(f, "timed out after {:?}", duration),
            Self::BleError(msg) => write!(f, "BLE error: {}", msg),
            Self::Other(msg) => write!(f, "{}", msg),
        }
    }
}

/// Reason why a device was not found.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum DeviceNotFoundReason {
    /// The peripheral id is not known to the transport.
    UnknownPeripheral { id: String },
    /// No Bluetooth adapter available.
    NoAdapter,
}

impl std::fmt::Display for DeviceNotFoundReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownPeripheral { id } => write!(f, "unknown peripheral '{}'", id),
            Self::NoAdapter => write!(f, "no Bluetooth adapter available"),
        }
    }
}

impl Error {
    /// Create a not-found error for a peripheral id the transport never saw.
    pub fn unknown_peripheral(id: impl Into<String>) -> Self {
        Self::DeviceNotFound(DeviceNotFoundReason::UnknownPeripheral { id: id.into() })
    }

    /// Create a timeout error with operation context.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create a characteristic not found error.
    pub fn characteristic_not_found(uuid: impl Into<String>) -> Self {
        Self::CharacteristicNotFound { uuid: uuid.into() }
    }

    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Create a connection failure for a peripheral.
    pub fn connection_failed(device_id: impl Into<String>, reason: ConnectionFailureReason) -> Self {
        Self::ConnectionFailed {
            device_id: Some(device_id.into()),
            reason,
        }
    }

    /// Create a connection failure with a string reason.
    pub fn connection_failed_str(device_id: Option<String>, reason: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            device_id,
            reason: ConnectionFailureReason::Other(reason.into()),
        }
    }

    /// Create a write failure for a characteristic.
    pub fn write_failed(uuid: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::WriteFailed {
            uuid: uuid.into(),
            reason: reason.into(),
        }
    }
}

impl From<calypso_types::ParseError> for Error {
    fn from(err: calypso_types::ParseError) -> Self {
        match err {
            calypso_types::ParseError::InvalidLength { expected, actual } => {
                Error::InvalidFrame { expected, actual }
            }
            calypso_types::ParseError::InvalidValue(msg) => Error::InvalidData(msg),
            // Handle future ParseError variants (non_exhaustive)
            _ => Error::InvalidData(format!("Parse error: {}", err)),
        }
    }
}

/// Result type alias using calypso-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;
