//! Service configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use calypso_core::{Backoff, DEFAULT_DEVICE_NAME, DeviceOptions, LinkTimeouts, OutputRate};

/// Service configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Device and session settings.
    pub device: DeviceConfig,
    /// BLE link timeouts.
    pub link: LinkConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Save configuration to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Write {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Validate the configuration and return any errors.
    ///
    /// This checks:
    /// - The device name is not empty
    /// - `rate` is 1, 4 or 8 and `compass` is 0 or 1 when set
    /// - The search timeout and every link timeout are non-zero
    ///
    /// # Example
    ///
    /// ```
    /// use calypso_service::Config;
    ///
    /// let config = Config::default();
    /// config.validate().expect("Default config should be valid");
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = self.device.validate();
        errors.extend(self.link.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Load and validate configuration from a file.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Driver options for this configuration.
    ///
    /// Out-of-range `rate` and `compass` values are treated as unset, with a
    /// warning, so the device keeps its own setting.
    pub fn device_options(&self) -> DeviceOptions {
        let device = &self.device;
        let mut options = DeviceOptions::new()
            .device_name(device.name.clone())
            .max_retries(device.max_retries)
            .search_timeout(Duration::from_secs(device.search_timeout_secs))
            .retry_on_discovery_failure(device.retry_on_discovery_failure)
            .backoff(Backoff::HalfStep);

        if let Some(raw) = device.rate {
            match OutputRate::try_from(raw) {
                Ok(rate) => options = options.rate(rate),
                Err(e) => warn!("Ignoring device.rate: {}", e),
            }
        }

        match device.compass {
            Some(0) => options = options.compass(false),
            Some(1) => options = options.compass(true),
            Some(other) => warn!("Ignoring device.compass: must be 0 or 1, got {}", other),
            None => {}
        }

        options
    }

    /// Link timeouts for the BLE transport.
    ///
    /// A zero timeout would fail every call, so it falls back to the default
    /// with a warning.
    pub fn link_timeouts(&self) -> LinkTimeouts {
        let defaults = LinkTimeouts::default();
        let timeout = |field: &str, secs: u64, default: Duration| {
            if secs == 0 {
                warn!("Ignoring link.{}: must be > 0, using {:?}", field, default);
                default
            } else {
                Duration::from_secs(secs)
            }
        };

        let link = &self.link;
        defaults
            .connect(timeout("connect_timeout_secs", link.connect_timeout_secs, defaults.connect))
            .discovery(timeout(
                "discovery_timeout_secs",
                link.discovery_timeout_secs,
                defaults.discovery,
            ))
            .read(timeout("read_timeout_secs", link.read_timeout_secs, defaults.read))
            .write(timeout("write_timeout_secs", link.write_timeout_secs, defaults.write))
    }
}

/// Default search timeout in seconds.
pub const DEFAULT_SEARCH_TIMEOUT_SECS: u64 = 120;

/// Device and session settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Advertised name to look for.
    pub name: String,
    /// Output rate in Hz (1, 4 or 8). Unset leaves the device alone.
    pub rate: Option<u8>,
    /// Compass: 1 on, 0 off. Unset leaves the device alone.
    pub compass: Option<u8>,
    /// Maximum retries per session (0 = unlimited).
    pub max_retries: u32,
    /// How long one search may run.
    pub search_timeout_secs: u64,
    /// Retry instead of idling when characteristic discovery fails.
    pub retry_on_discovery_failure: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_DEVICE_NAME.to_string(),
            rate: None,
            compass: None,
            max_retries: 0,
            search_timeout_secs: DEFAULT_SEARCH_TIMEOUT_SECS,
            retry_on_discovery_failure: false,
        }
    }
}

impl DeviceConfig {
    /// Validate device configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.name.trim().is_empty() {
            errors.push(ValidationError {
                field: "device.name".to_string(),
                message: "device name cannot be empty".to_string(),
            });
        }

        if let Some(rate) = self.rate
            && OutputRate::try_from(rate).is_err()
        {
            errors.push(ValidationError {
                field: "device.rate".to_string(),
                message: format!("rate {} is not supported (use 1, 4 or 8)", rate),
            });
        }

        if let Some(compass) = self.compass
            && compass > 1
        {
            errors.push(ValidationError {
                field: "device.compass".to_string(),
                message: format!("compass must be 0 or 1, got {}", compass),
            });
        }

        if self.search_timeout_secs == 0 {
            errors.push(ValidationError {
                field: "device.search_timeout_secs".to_string(),
                message: "search timeout must be greater than 0".to_string(),
            });
        }

        errors
    }
}

/// BLE link timeouts, in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub connect_timeout_secs: u64,
    pub discovery_timeout_secs: u64,
    pub read_timeout_secs: u64,
    pub write_timeout_secs: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        let timeouts = LinkTimeouts::default();
        Self {
            connect_timeout_secs: timeouts.connect.as_secs(),
            discovery_timeout_secs: timeouts.discovery.as_secs(),
            read_timeout_secs: timeouts.read.as_secs(),
            write_timeout_secs: timeouts.write.as_secs(),
        }
    }
}

impl LinkConfig {
    /// Validate link configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        [
            ("link.connect_timeout_secs", self.connect_timeout_secs),
            ("link.discovery_timeout_secs", self.discovery_timeout_secs),
            ("link.read_timeout_secs", self.read_timeout_secs),
            ("link.write_timeout_secs", self.write_timeout_secs),
        ]
        .into_iter()
        .filter(|(_, secs)| *secs == 0)
        .map(|(field, _)| ValidationError {
            field: field.to_string(),
            message: "timeout must be greater than 0".to_string(),
        })
        .collect()
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// The field path (e.g., `device.rate`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("calypso")
        .join("ultrasonic.toml")
}
