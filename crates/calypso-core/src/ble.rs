//! [`Transport`] implementation on top of `btleplug`.
//!
//! Peripherals seen while scanning are remembered by their formatted id, so
//! the driver can refer to them by string afterwards. Every link operation
//! runs under a timeout from [`LinkTimeouts`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use tokio::sync::RwLock;
use tokio::time::timeout;
use tracing::{debug, info, trace};
use uuid::Uuid;

use crate::error::{ConnectionFailureReason, DeviceNotFoundReason, Error, Result};
use crate::transport::{
    Advertisement, AdvertisementStream, DiscoveredCharacteristic, NotificationStream, Transport,
};
use crate::util::{format_peripheral_id, names_match};

/// Default timeout for establishing a connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Default timeout for service discovery.
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for characteristic reads.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for characteristic writes.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeouts for BLE link operations.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use calypso_core::LinkTimeouts;
///
/// let timeouts = LinkTimeouts::default()
///     .connect(Duration::from_secs(25))
///     .read(Duration::from_secs(15));
/// assert_eq!(timeouts.write, Duration::from_secs(10));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkTimeouts {
    pub connect: Duration,
    pub discovery: Duration,
    pub read: Duration,
    pub write: Duration,
}

impl Default for LinkTimeouts {
    fn default() -> Self {
        Self {
            connect: DEFAULT_CONNECT_TIMEOUT,
            discovery: DEFAULT_DISCOVERY_TIMEOUT,
            read: DEFAULT_READ_TIMEOUT,
            write: DEFAULT_WRITE_TIMEOUT,
        }
    }
}

impl LinkTimeouts {
    /// Set the connect timeout.
    #[must_use]
    pub fn connect(mut self, timeout: Duration) -> Self {
        self.connect = timeout;
        self
    }

    /// Set the service discovery timeout.
    #[must_use]
    pub fn discovery(mut self, timeout: Duration) -> Self {
        self.discovery = timeout;
        self
    }

    /// Set the read timeout.
    #[must_use]
    pub fn read(mut self, timeout: Duration) -> Self {
        self.read = timeout;
        self
    }

    /// Set the write timeout.
    #[must_use]
    pub fn write(mut self, timeout: Duration) -> Self {
        self.write = timeout;
        self
    }
}

type PeripheralMap = Arc<RwLock<HashMap<String, Peripheral>>>;

/// BLE transport backed by a `btleplug` adapter.
pub struct BleTransport {
    adapter: Adapter,
    timeouts: LinkTimeouts,
    peripherals: PeripheralMap,
}

impl std::fmt::Debug for BleTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BleTransport")
            .field("timeouts", &self.timeouts)
            .finish_non_exhaustive()
    }
}

impl BleTransport {
    /// Use the first available Bluetooth adapter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceNotFound`] with [`DeviceNotFoundReason::NoAdapter`]
    /// if the system has no adapter, or a Bluetooth error if the manager could
    /// not be created.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(Error::DeviceNotFound(DeviceNotFoundReason::NoAdapter))?;

        match adapter.adapter_info().await {
            Ok(adapter_info) => info!("Using adapter {}", adapter_info),
            Err(e) => debug!("Adapter info unavailable: {}", e),
        }
        Ok(Self::with_adapter(adapter))
    }

    /// Use a specific adapter.
    pub fn with_adapter(adapter: Adapter) -> Self {
        Self {
            adapter,
            timeouts: LinkTimeouts::default(),
            peripherals: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Replace the link timeouts.
    #[must_use]
    pub fn timeouts(mut self, timeouts: LinkTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Link timeouts in use.
    pub fn link_timeouts(&self) -> LinkTimeouts {
        self.timeouts
    }

    async fn peripheral(&self, id: &str) -> Result<Peripheral> {
        self.peripherals
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| Error::unknown_peripheral(id))
    }

    async fn characteristic(&self, id: &str, uuid: Uuid) -> Result<(Peripheral, Characteristic)> {
        let peripheral = self.peripheral(id).await?;
        let characteristic = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
            .ok_or_else(|| Error::characteristic_not_found(uuid.to_string()))?;
        Ok((peripheral, characteristic))
    }
}

/// Turn a known peripheral into an advertisement, remembering it for later calls.
async fn advertise(
    peripheral: Peripheral,
    peripherals: PeripheralMap,
    name_filter: Arc<str>,
) -> Option<Advertisement> {
    let properties = match peripheral.properties().await {
        Ok(Some(properties)) => properties,
        Ok(None) => return None,
        Err(e) => {
            debug!("Error reading peripheral properties: {}", e);
            return None;
        }
    };

    let local_name = properties.local_name?;
    if !names_match(&local_name, &name_filter) {
        trace!("Skipping {:?}", local_name);
        return None;
    }

    let id = format_peripheral_id(&peripheral.id());
    peripherals.write().await.insert(id.clone(), peripheral);
    Some(Advertisement {
        id,
        local_name: Some(local_name),
        rssi: properties.rssi,
    })
}

#[async_trait]
impl Transport for BleTransport {
    #[tracing::instrument(level = "debug", skip(self))]
    async fn scan(&self, name_filter: &str) -> Result<AdvertisementStream> {
        let events = self.adapter.events().await?;
        self.adapter.start_scan(ScanFilter::default()).await?;
        info!("Scanning for {:?}", name_filter);

        let name_filter: Arc<str> = Arc::from(name_filter);

        // Peripherals the adapter already knows may not be re-announced.
        let known = self.adapter.peripherals().await?;
        let cached = {
            let peripherals = Arc::clone(&self.peripherals);
            let name_filter = Arc::clone(&name_filter);
            futures::stream::iter(known).filter_map(move |peripheral| {
                advertise(peripheral, Arc::clone(&peripherals), Arc::clone(&name_filter))
            })
        };

        let adapter = self.adapter.clone();
        let peripherals = Arc::clone(&self.peripherals);
        let discovered = events.filter_map(move |event| {
            let adapter = adapter.clone();
            let peripherals = Arc::clone(&peripherals);
            let name_filter = Arc::clone(&name_filter);
            async move {
                let id = match event {
                    CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
                    _ => return None,
                };
                let peripheral = adapter.peripheral(&id).await.ok()?;
                advertise(peripheral, peripherals, name_filter).await
            }
        });

        Ok(cached.chain(discovered).boxed())
    }

    async fn stop_scan(&self) -> Result<()> {
        self.adapter.stop_scan().await?;
        Ok(())
    }

    #[tracing::instrument(level = "info", skip(self))]
    async fn connect(&self, peripheral: &str) -> Result<()> {
        let device = self.peripheral(peripheral).await?;
        timeout(self.timeouts.connect, device.connect())
            .await
            .map_err(|_| {
                Error::connection_failed(
                    peripheral,
                    ConnectionFailureReason::Timeout(self.timeouts.connect),
                )
            })?
            .map_err(|e| {
                Error::connection_failed(peripheral, ConnectionFailureReason::BleError(e.to_string()))
            })?;
        info!("Connected");
        Ok(())
    }

    #[tracing::instrument(level = "info", skip(self))]
    async fn disconnect(&self, peripheral: &str) -> Result<()> {
        let device = self.peripheral(peripheral).await?;
        if device.is_connected().await.unwrap_or(false) {
            device.disconnect().await?;
            info!("Disconnected");
        }
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn discover_characteristics(
        &self,
        peripheral: &str,
    ) -> Result<Vec<DiscoveredCharacteristic>> {
        let device = self.peripheral(peripheral).await?;
        timeout(self.timeouts.discovery, device.discover_services())
            .await
            .map_err(|_| Error::timeout("discover services", self.timeouts.discovery))??;

        let mut characteristics = Vec::new();
        for service in device.services() {
            debug!("Service: {}", service.uuid);
            for characteristic in &service.characteristics {
                debug!("  Characteristic: {}", characteristic.uuid);
                characteristics.push(DiscoveredCharacteristic::new(characteristic.uuid));
            }
        }
        Ok(characteristics)
    }

    async fn read(&self, peripheral: &str, uuid: Uuid) -> Result<Vec<u8>> {
        let (device, characteristic) = self.characteristic(peripheral, uuid).await?;
        let data = timeout(self.timeouts.read, device.read(&characteristic))
            .await
            .map_err(|_| {
                Error::timeout(format!("read characteristic {}", uuid), self.timeouts.read)
            })??;
        Ok(data)
    }

    async fn write(&self, peripheral: &str, uuid: Uuid, data: &[u8]) -> Result<()> {
        let (device, characteristic) = self.characteristic(peripheral, uuid).await?;
        timeout(
            self.timeouts.write,
            device.write(&characteristic, data, WriteType::WithResponse),
        )
        .await
        .map_err(|_| Error::timeout(format!("write characteristic {}", uuid), self.timeouts.write))?
        .map_err(|e| Error::write_failed(uuid.to_string(), e.to_string()))?;
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn subscribe(&self, peripheral: &str, uuid: Uuid) -> Result<NotificationStream> {
        let (device, characteristic) = self.characteristic(peripheral, uuid).await?;

        let notifications = device.notifications().await?;
        device.subscribe(&characteristic).await?;

        Ok(notifications
            .filter_map(move |notification| async move {
                (notification.uuid == uuid).then_some(notification.value)
            })
            .boxed())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn disconnected(&self, peripheral: &str) -> Result<()> {
        let device = self.peripheral(peripheral).await?;

        // Subscribe before checking, so a drop in between is not missed.
        let mut events = self.adapter.events().await?;
        if !device.is_connected().await? {
            return Ok(());
        }

        let id = device.id();
        while let Some(event) = events.next().await {
            if matches!(&event, CentralEvent::DeviceDisconnected(lost) if *lost == id) {
                debug!("Peripheral disconnected");
                return Ok(());
            }
        }
        debug!("Adapter event stream ended");
        Ok(())
    }
}
