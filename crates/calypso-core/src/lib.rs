//! Core BLE driver for the Calypso Ultrasonic anemometer.
//!
//! This crate finds the anemometer by its advertised name, connects to it,
//! applies the configured output rate and compass setting, and turns every
//! telemetry notification into a delta envelope for the host.
//!
//! # Features
//!
//! - **Connection lifecycle**: search, connect, configure and stream, with a
//!   single retry counter and configurable backoff
//! - **Device configuration**: output rate (1, 4 or 8 Hz) and compass on/off,
//!   each read back after the write
//! - **Telemetry decoding**: wind, battery, temperature and, with the compass
//!   enabled, roll, pitch and magnetic heading
//! - **Delta output**: one envelope per frame on a broadcast port
//! - **Testability**: every BLE call goes through [`Transport`], with
//!   [`MockTransport`] for tests
//!
//! # Platform Differences
//!
//! Peripheral ids come from `btleplug` and are only meaningful for the
//! adapter that produced them: CoreBluetooth UUIDs on macOS, MAC addresses
//! on Linux and Windows. The driver never persists them and always finds the
//! device by name.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use calypso_core::{BleTransport, DeviceOptions, Ultrasonic};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let driver = Ultrasonic::new(Arc::new(BleTransport::new().await?), DeviceOptions::new());
//!     let mut status = driver.status();
//!     driver.start().await?;
//!
//!     while let Ok(event) = status.recv().await {
//!         println!("{}", event);
//!     }
//!     Ok(())
//! }
//! ```

pub mod ble;
pub mod configurator;
pub mod delta;
pub mod driver;
pub mod error;
pub mod events;
pub mod mock;
pub mod options;
pub mod retry;
pub mod transport;
pub mod util;

pub use ble::{BleTransport, LinkTimeouts};
pub use configurator::{DeviceConfigurator, ReadEffects};
pub use delta::{Delta, DeltaValue, ObservationPublisher, PathValue};
pub use driver::Ultrasonic;
pub use error::{ConnectionFailureReason, DeviceNotFoundReason, Error, Result};
pub use events::{ConnectionState, EventDispatcher, Status, StatusEvent};
pub use mock::{MockTransport, MockTransportBuilder};
pub use options::{DEFAULT_DEVICE_NAME, DEFAULT_SEARCH_TIMEOUT, DeviceOptions, OutputRate};
pub use retry::{Backoff, RetryDecision, RetryState};
pub use transport::{
    Advertisement, AdvertisementStream, DiscoveredCharacteristic, NotificationStream, Transport,
};
pub use util::{format_peripheral_id, names_match};

// Re-export from calypso-types
pub use calypso_types::uuids;
pub use calypso_types::{
    Attitude, CharacteristicRole, DeviceInfoKind, DeviceInfoRecord, DeviceState, InfoValue,
    Observation, OperatingMode,
};
