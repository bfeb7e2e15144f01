//! Driver options.
//!
//! [`DeviceOptions`] is the immutable input to a driver session. It is
//! separate from [`calypso_types::DeviceState`], which holds what the device
//! last reported about itself.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use calypso_core::{DeviceOptions, OutputRate};
//!
//! let options = DeviceOptions::new()
//!     .rate(OutputRate::Hz8)
//!     .compass(true)
//!     .max_retries(10)
//!     .search_timeout(Duration::from_secs(60));
//! assert!(options.validate().is_ok());
//! ```

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::retry::Backoff;

/// Advertised name of the anemometer.
pub const DEFAULT_DEVICE_NAME: &str = "ULTRASONIC";

/// How long a search may run before it counts as failed.
pub const DEFAULT_SEARCH_TIMEOUT: Duration = Duration::from_secs(120);

/// Telemetry output rate the device can be configured to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum OutputRate {
    Hz1 = 1,
    Hz4 = 4,
    Hz8 = 8,
}

impl OutputRate {
    /// Rate in Hz, also the byte written to the rate characteristic.
    pub fn hz(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for OutputRate {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(OutputRate::Hz1),
            4 => Ok(OutputRate::Hz4),
            8 => Ok(OutputRate::Hz8),
            other => Err(Error::invalid_config(format!(
                "rate must be 1, 4 or 8 Hz, got {}",
                other
            ))),
        }
    }
}

impl From<OutputRate> for u8 {
    fn from(rate: OutputRate) -> Self {
        rate.hz()
    }
}

impl fmt::Display for OutputRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} Hz", self.hz())
    }
}

/// Options for one driver session.
#[derive(Debug, Clone)]
pub struct DeviceOptions {
    /// Rate to write on connect. `None` leaves the device setting alone.
    pub rate: Option<OutputRate>,
    /// Compass setting to write on connect. `None` leaves it alone.
    pub compass: Option<bool>,
    /// Maximum retries per session (0 = unlimited).
    pub max_retries: u32,
    /// Advertised name to match (exact, case-insensitive).
    pub device_name: String,
    /// Delay policy between retries.
    pub backoff: Backoff,
    /// How long to search before retrying.
    pub search_timeout: Duration,
    /// Retry when characteristic discovery fails instead of staying connected.
    pub retry_on_discovery_failure: bool,
}

impl Default for DeviceOptions {
    fn default() -> Self {
        Self {
            rate: None,
            compass: None,
            max_retries: 0,
            device_name: DEFAULT_DEVICE_NAME.to_string(),
            backoff: Backoff::HalfStep,
            search_timeout: DEFAULT_SEARCH_TIMEOUT,
            retry_on_discovery_failure: false,
        }
    }
}

impl DeviceOptions {
    /// Create options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the output rate to configure.
    #[must_use]
    pub fn rate(mut self, rate: OutputRate) -> Self {
        self.rate = Some(rate);
        self
    }

    /// Set whether the compass should be enabled.
    #[must_use]
    pub fn compass(mut self, enabled: bool) -> Self {
        self.compass = Some(enabled);
        self
    }

    /// Set the maximum number of retries (0 = unlimited).
    #[must_use]
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the advertised name to look for.
    #[must_use]
    pub fn device_name(mut self, name: impl Into<String>) -> Self {
        self.device_name = name.into();
        self
    }

    /// Set the backoff policy.
    #[must_use]
    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set the search timeout.
    #[must_use]
    pub fn search_timeout(mut self, timeout: Duration) -> Self {
        self.search_timeout = timeout;
        self
    }

    /// Retry instead of idling when characteristic discovery fails.
    #[must_use]
    pub fn retry_on_discovery_failure(mut self, retry: bool) -> Self {
        self.retry_on_discovery_failure = retry;
        self
    }

    /// Validate the options and return an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.device_name.trim().is_empty() {
            return Err(Error::invalid_config("device_name must not be empty"));
        }
        if self.search_timeout.is_zero() {
            return Err(Error::invalid_config("search_timeout must be > 0"));
        }
        self.backoff.validate()
    }
}
