//! Host service for the Calypso Ultrasonic anemometer.
//!
//! This crate provides a service that:
//! - Finds, connects to and configures the anemometer over BLE
//! - Writes one delta per telemetry frame as a JSON line on stdout
//! - Logs status events and device information to stderr
//!
//! # Configuration
//!
//! The service reads configuration from `~/.config/calypso/ultrasonic.toml`:
//!
//! ```toml
//! [device]
//! name = "ULTRASONIC"
//! rate = 4          # 1, 4 or 8 Hz; omit to keep the device setting
//! compass = 1       # 1 on, 0 off; omit to keep the device setting
//! max_retries = 0   # 0 = retry forever
//! search_timeout_secs = 120
//!
//! [link]
//! connect_timeout_secs = 15
//! discovery_timeout_secs = 10
//! read_timeout_secs = 10
//! write_timeout_secs = 10
//! ```

pub mod collector;
pub mod config;

pub use collector::{Collector, CollectorError, Exit};
pub use config::{Config, ConfigError, DeviceConfig, LinkConfig, ValidationError};
