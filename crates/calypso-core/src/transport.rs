//! Transport abstraction over the BLE stack.
//!
//! The driver never touches `btleplug` directly. It is handed an
//! `Arc<dyn Transport>` and works in terms of peripheral ids, characteristic
//! UUIDs and byte buffers. [`crate::BleTransport`] implements this on top of
//! `btleplug`; [`crate::MockTransport`] implements it for tests.

use async_trait::async_trait;
use futures::stream::BoxStream;
use uuid::Uuid;

use calypso_types::CharacteristicRole;
use calypso_types::uuids::roles_for;

use crate::error::Result;

/// An advertisement seen while scanning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    /// Transport-specific peripheral id, used for every later call.
    pub id: String,
    /// Advertised local name, if any.
    pub local_name: Option<String>,
    /// Signal strength in dBm.
    pub rssi: Option<i16>,
}

impl Advertisement {
    /// Create an advertisement with a local name.
    pub fn named(id: impl Into<String>, local_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            local_name: Some(local_name.into()),
            rssi: None,
        }
    }
}

/// A characteristic found during discovery, already mapped to its roles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredCharacteristic {
    pub uuid: Uuid,
    pub roles: &'static [CharacteristicRole],
}

impl DiscoveredCharacteristic {
    /// Classify a characteristic by its UUID.
    pub fn new(uuid: Uuid) -> Self {
        Self {
            uuid,
            roles: roles_for(uuid),
        }
    }

    /// Whether this characteristic carries `role`.
    pub fn has_role(&self, role: CharacteristicRole) -> bool {
        self.roles.contains(&role)
    }
}

/// Stream of advertisements produced by a scan.
pub type AdvertisementStream = BoxStream<'static, Advertisement>;

/// Stream of notification payloads. It may end when the link drops; use
/// [`Transport::disconnected`] to watch the link itself.
pub type NotificationStream = BoxStream<'static, Vec<u8>>;

/// BLE operations the driver needs.
///
/// Implementations must be cheap to share (`Arc<dyn Transport>`) and must not
/// hold any driver state: the session task owns everything else.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Start scanning. `name_filter` is a hint; callers still match names.
    async fn scan(&self, name_filter: &str) -> Result<AdvertisementStream>;

    /// Stop scanning. Must succeed when no scan is running.
    async fn stop_scan(&self) -> Result<()>;

    /// Connect to a peripheral seen in a scan.
    async fn connect(&self, peripheral: &str) -> Result<()>;

    /// Disconnect from a peripheral. Must succeed when already disconnected.
    async fn disconnect(&self, peripheral: &str) -> Result<()>;

    /// Discover all characteristics, in the order the peripheral lists them.
    async fn discover_characteristics(
        &self,
        peripheral: &str,
    ) -> Result<Vec<DiscoveredCharacteristic>>;

    /// Read a characteristic.
    async fn read(&self, peripheral: &str, uuid: Uuid) -> Result<Vec<u8>>;

    /// Write a characteristic (with response).
    async fn write(&self, peripheral: &str, uuid: Uuid, data: &[u8]) -> Result<()>;

    /// Subscribe to notifications on a characteristic.
    async fn subscribe(&self, peripheral: &str, uuid: Uuid) -> Result<NotificationStream>;

    /// Resolve once the link to `peripheral` is lost.
    ///
    /// Resolves immediately if the peripheral is not connected. An error
    /// means the link cannot be watched at all.
    async fn disconnected(&self, peripheral: &str) -> Result<()>;
}
