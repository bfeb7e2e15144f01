//! Error types for data parsing in calypso-types.

use thiserror::Error;

/// Errors that can occur when parsing Ultrasonic payloads.
///
/// This error type is platform-agnostic and does not include
/// BLE-specific errors (those belong in calypso-core).
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ParseError {
    /// Payload did not have the fixed length the format requires.
    #[error("Invalid payload length: expected {expected} bytes, got {actual}")]
    InvalidLength {
        /// Required payload size.
        expected: usize,
        /// Actual payload size received.
        actual: usize,
    },

    /// Payload was long enough but carried an unusable value.
    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

/// Result type alias using calypso-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
