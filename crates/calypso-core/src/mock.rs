//! Mock transport for testing.
//!
//! [`MockTransport`] implements [`Transport`] without BLE hardware. It plays
//! back scripted advertisements, serves characteristic values from memory and
//! records every call so tests can assert on the exact sequence of operations.
//!
//! # Features
//!
//! - **Failure injection**: scan, connect (permanent or transient), discovery,
//!   subscribe, and per-characteristic reads and writes
//! - **Notifications**: push telemetry frames with [`MockTransport::notify`]
//!   and simulate a link drop with [`MockTransport::drop_link`]
//! - **Write-through values**: a write replaces the value later reads return

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::channel::mpsc;
use tokio::sync::{RwLock, watch};
use uuid::Uuid;

use calypso_types::uuids;

use crate::error::{DeviceNotFoundReason, Error, Result};
use crate::transport::{
    Advertisement, AdvertisementStream, DiscoveredCharacteristic, NotificationStream, Transport,
};

/// Peripheral id used by [`MockTransport::ultrasonic`].
pub const MOCK_PERIPHERAL_ID: &str = "MOCK-ULTRASONIC";

/// Telemetry frame served by [`MockTransport::ultrasonic`]: 10 m/s at 300°.
pub const SAMPLE_FRAME: [u8; 10] = [0xE8, 0x03, 0x2C, 0x01, 0x0A, 0x96, 0x3C, 0x3C, 0xF0, 0x00];

/// A call recorded by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Scan,
    StopScan,
    Connect(String),
    Disconnect(String),
    Discover,
    Read(Uuid),
    Write(Uuid, Vec<u8>),
    Subscribe(Uuid),
}

/// A mock BLE transport.
pub struct MockTransport {
    advertisements: RwLock<Vec<Advertisement>>,
    characteristics: RwLock<Vec<(Uuid, Vec<u8>)>>,
    operations: RwLock<Vec<Operation>>,
    notifier: RwLock<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    connected: watch::Sender<bool>,
    scan_count: AtomicU32,
    connect_count: AtomicU32,
    fail_scan: AtomicBool,
    fail_connect: AtomicBool,
    /// Connect attempts to fail before succeeding.
    remaining_connect_failures: AtomicU32,
    fail_discovery: AtomicBool,
    fail_subscribe: AtomicBool,
    read_failures: RwLock<HashSet<Uuid>>,
    write_failures: RwLock<HashSet<Uuid>>,
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("connected", &*self.connected.borrow())
            .field("scan_count", &self.scan_count.load(Ordering::Relaxed))
            .field("connect_count", &self.connect_count.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// Create a transport with nothing in range.
    pub fn new() -> Self {
        Self::with_parts(Vec::new(), Vec::new())
    }

    /// Create a transport with one Ultrasonic in range, exposing the full
    /// set of characteristics with plausible values.
    pub fn ultrasonic() -> Self {
        MockTransportBuilder::ultrasonic().build()
    }

    fn with_parts(advertisements: Vec<Advertisement>, characteristics: Vec<(Uuid, Vec<u8>)>) -> Self {
        Self {
            advertisements: RwLock::new(advertisements),
            characteristics: RwLock::new(characteristics),
            operations: RwLock::new(Vec::new()),
            notifier: RwLock::new(None),
            connected: watch::channel(false).0,
            scan_count: AtomicU32::new(0),
            connect_count: AtomicU32::new(0),
            fail_scan: AtomicBool::new(false),
            fail_connect: AtomicBool::new(false),
            remaining_connect_failures: AtomicU32::new(0),
            fail_discovery: AtomicBool::new(false),
            fail_subscribe: AtomicBool::new(false),
            read_failures: RwLock::new(HashSet::new()),
            write_failures: RwLock::new(HashSet::new()),
        }
    }

    // --- Test control methods ---

    /// Replace the advertisements played back by the next scan.
    pub async fn set_advertisements(&self, advertisements: Vec<Advertisement>) {
        *self.advertisements.write().await = advertisements;
    }

    /// Set the value of a characteristic, adding it if unknown.
    pub async fn set_value(&self, uuid: Uuid, value: Vec<u8>) {
        let mut characteristics = self.characteristics.write().await;
        match characteristics.iter_mut().find(|(u, _)| *u == uuid) {
            Some((_, existing)) => *existing = value,
            None => characteristics.push((uuid, value)),
        }
    }

    /// Current value of a characteristic.
    pub async fn value(&self, uuid: Uuid) -> Option<Vec<u8>> {
        self.characteristics
            .read()
            .await
            .iter()
            .find(|(u, _)| *u == uuid)
            .map(|(_, v)| v.clone())
    }

    /// Make every scan fail to start.
    pub fn set_fail_scan(&self, fail: bool) {
        self.fail_scan.store(fail, Ordering::Relaxed);
    }

    /// Make every connect fail.
    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::Relaxed);
    }

    /// Fail the next `count` connects, then succeed.
    pub fn set_transient_connect_failures(&self, count: u32) {
        self.remaining_connect_failures
            .store(count, Ordering::Relaxed);
    }

    /// Make characteristic discovery fail.
    pub fn set_fail_discovery(&self, fail: bool) {
        self.fail_discovery.store(fail, Ordering::Relaxed);
    }

    /// Make subscribe fail.
    pub fn set_fail_subscribe(&self, fail: bool) {
        self.fail_subscribe.store(fail, Ordering::Relaxed);
    }

    /// Make reads of `uuid` fail.
    pub async fn fail_read(&self, uuid: Uuid) {
        self.read_failures.write().await.insert(uuid);
    }

    /// Make writes to `uuid` fail.
    pub async fn fail_write(&self, uuid: Uuid) {
        self.write_failures.write().await.insert(uuid);
    }

    /// Push a notification to the current subscriber.
    ///
    /// Returns `false` if nobody is subscribed.
    pub async fn notify(&self, frame: &[u8]) -> bool {
        match self.notifier.read().await.as_ref() {
            Some(sender) => sender.unbounded_send(frame.to_vec()).is_ok(),
            None => false,
        }
    }

    /// Simulate the link dropping: the notification stream ends and
    /// [`Transport::disconnected`] resolves.
    pub async fn drop_link(&self) {
        self.connected.send_replace(false);
        self.notifier.write().await.take();
    }

    /// All operations recorded so far.
    pub async fn operations(&self) -> Vec<Operation> {
        self.operations.read().await.clone()
    }

    /// Writes recorded so far, in order.
    pub async fn writes(&self) -> Vec<(Uuid, Vec<u8>)> {
        self.operations
            .read()
            .await
            .iter()
            .filter_map(|op| match op {
                Operation::Write(uuid, data) => Some((*uuid, data.clone())),
                _ => None,
            })
            .collect()
    }

    /// Number of reads of `uuid` recorded so far.
    pub async fn read_count(&self, uuid: Uuid) -> usize {
        self.operations
            .read()
            .await
            .iter()
            .filter(|op| **op == Operation::Read(uuid))
            .count()
    }

    /// Number of subscribe calls recorded so far.
    pub async fn subscribe_count(&self) -> usize {
        self.operations
            .read()
            .await
            .iter()
            .filter(|op| matches!(op, Operation::Subscribe(_)))
            .count()
    }

    /// Number of scans started.
    pub fn scan_count(&self) -> u32 {
        self.scan_count.load(Ordering::Relaxed)
    }

    /// Number of connect attempts.
    pub fn connect_count(&self) -> u32 {
        self.connect_count.load(Ordering::Relaxed)
    }

    /// Whether the mock considers itself connected.
    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    async fn record(&self, op: Operation) {
        self.operations.write().await.push(op);
    }

    fn check_connected(&self) -> Result<()> {
        if !*self.connected.borrow() {
            Err(Error::NotConnected)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn scan(&self, _name_filter: &str) -> Result<AdvertisementStream> {
        self.scan_count.fetch_add(1, Ordering::Relaxed);
        self.record(Operation::Scan).await;

        if self.fail_scan.load(Ordering::Relaxed) {
            return Err(Error::DeviceNotFound(DeviceNotFoundReason::NoAdapter));
        }

        let advertisements = self.advertisements.read().await.clone();
        Ok(futures::stream::iter(advertisements)
            .chain(futures::stream::pending())
            .boxed())
    }

    async fn stop_scan(&self) -> Result<()> {
        self.record(Operation::StopScan).await;
        Ok(())
    }

    async fn connect(&self, peripheral: &str) -> Result<()> {
        self.connect_count.fetch_add(1, Ordering::Relaxed);
        self.record(Operation::Connect(peripheral.to_string())).await;

        if !self
            .advertisements
            .read()
            .await
            .iter()
            .any(|a| a.id == peripheral)
        {
            return Err(Error::unknown_peripheral(peripheral));
        }

        if self.remaining_connect_failures.load(Ordering::Relaxed) > 0 {
            self.remaining_connect_failures
                .fetch_sub(1, Ordering::Relaxed);
            return Err(Error::connection_failed_str(
                Some(peripheral.to_string()),
                "Mock transient failure",
            ));
        }

        if self.fail_connect.load(Ordering::Relaxed) {
            return Err(Error::connection_failed_str(
                Some(peripheral.to_string()),
                "Mock failure",
            ));
        }

        self.connected.send_replace(true);
        Ok(())
    }

    async fn disconnect(&self, peripheral: &str) -> Result<()> {
        self.record(Operation::Disconnect(peripheral.to_string()))
            .await;
        self.connected.send_replace(false);
        self.notifier.write().await.take();
        Ok(())
    }

    async fn discover_characteristics(
        &self,
        _peripheral: &str,
    ) -> Result<Vec<DiscoveredCharacteristic>> {
        self.record(Operation::Discover).await;
        self.check_connected()?;

        if self.fail_discovery.load(Ordering::Relaxed) {
            return Err(Error::timeout(
                "discover characteristics",
                Duration::from_secs(10),
            ));
        }

        Ok(self
            .characteristics
            .read()
            .await
            .iter()
            .map(|(uuid, _)| DiscoveredCharacteristic::new(*uuid))
            .collect())
    }

    async fn read(&self, _peripheral: &str, uuid: Uuid) -> Result<Vec<u8>> {
        self.record(Operation::Read(uuid)).await;
        self.check_connected()?;

        if self.read_failures.read().await.contains(&uuid) {
            return Err(Error::timeout(
                format!("read characteristic {}", uuid),
                Duration::from_secs(10),
            ));
        }

        self.value(uuid)
            .await
            .ok_or_else(|| Error::characteristic_not_found(uuid.to_string()))
    }

    async fn write(&self, _peripheral: &str, uuid: Uuid, data: &[u8]) -> Result<()> {
        self.record(Operation::Write(uuid, data.to_vec())).await;
        self.check_connected()?;

        if self.write_failures.read().await.contains(&uuid) {
            return Err(Error::write_failed(uuid.to_string(), "Mock failure"));
        }

        let mut characteristics = self.characteristics.write().await;
        match characteristics.iter_mut().find(|(u, _)| *u == uuid) {
            Some((_, value)) => {
                *value = data.to_vec();
                Ok(())
            }
            None => Err(Error::characteristic_not_found(uuid.to_string())),
        }
    }

    async fn subscribe(&self, _peripheral: &str, uuid: Uuid) -> Result<NotificationStream> {
        self.record(Operation::Subscribe(uuid)).await;
        self.check_connected()?;

        if self.fail_subscribe.load(Ordering::Relaxed) {
            return Err(Error::InvalidData("Mock subscribe failure".to_string()));
        }

        let (sender, receiver) = mpsc::unbounded();
        *self.notifier.write().await = Some(sender);
        Ok(receiver.boxed())
    }

    async fn disconnected(&self, _peripheral: &str) -> Result<()> {
        let mut link = self.connected.subscribe();
        // The sender lives as long as `self`.
        let _ = link.wait_for(|connected| !connected).await;
        Ok(())
    }
}

/// Builder for creating mock transports with custom settings.
#[derive(Debug, Clone, Default)]
pub struct MockTransportBuilder {
    advertisements: Vec<Advertisement>,
    characteristics: Vec<(Uuid, Vec<u8>)>,
    fail_scan: bool,
    fail_connect: bool,
    connect_failures: u32,
    fail_discovery: bool,
    fail_subscribe: bool,
    read_failures: HashSet<Uuid>,
    write_failures: HashSet<Uuid>,
}

impl MockTransportBuilder {
    /// Create an empty builder: nothing in range.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from one Ultrasonic in range with every characteristic present.
    #[must_use]
    pub fn ultrasonic() -> Self {
        Self::new()
            .advertise(Advertisement::named(MOCK_PERIPHERAL_ID, "ULTRASONIC"))
            .characteristic(uuids::MANUFACTURER_NAME, b"Calypso Instruments".to_vec())
            .characteristic(uuids::MODEL_NUMBER, b"ULTRASONIC".to_vec())
            .characteristic(uuids::SERIAL_NUMBER, b"MOCK-0001".to_vec())
            .characteristic(uuids::HARDWARE_REVISION, b"1.0".to_vec())
            .characteristic(uuids::FIRMWARE_REVISION, b"1.2.3".to_vec())
            .characteristic(uuids::SOFTWARE_REVISION, b"1.0".to_vec())
            .characteristic(uuids::OPERATING_MODE, vec![2])
            .characteristic(uuids::DATA_RATE, vec![4])
            .characteristic(uuids::COMPASS, vec![0])
            .characteristic(uuids::ANGLE_OFFSET, vec![0, 0])
            .characteristic(uuids::CALIBRATION, vec![0])
            .characteristic(uuids::WIND_SPEED_CORRECTION, 1.0f32.to_le_bytes().to_vec())
            .characteristic(uuids::TELEMETRY, SAMPLE_FRAME.to_vec())
    }

    /// Add an advertisement to play back on scan.
    #[must_use]
    pub fn advertise(mut self, advertisement: Advertisement) -> Self {
        self.advertisements.push(advertisement);
        self
    }

    /// Add a characteristic with its initial value.
    #[must_use]
    pub fn characteristic(mut self, uuid: Uuid, value: Vec<u8>) -> Self {
        self.characteristics.push((uuid, value));
        self
    }

    /// Remove a characteristic.
    #[must_use]
    pub fn without_characteristic(mut self, uuid: Uuid) -> Self {
        self.characteristics.retain(|(u, _)| *u != uuid);
        self
    }

    /// Fail every scan.
    #[must_use]
    pub fn fail_scan(mut self) -> Self {
        self.fail_scan = true;
        self
    }

    /// Fail every connect.
    #[must_use]
    pub fn fail_connect(mut self) -> Self {
        self.fail_connect = true;
        self
    }

    /// Fail the first `count` connects.
    #[must_use]
    pub fn connect_failures(mut self, count: u32) -> Self {
        self.connect_failures = count;
        self
    }

    /// Fail characteristic discovery.
    #[must_use]
    pub fn fail_discovery(mut self) -> Self {
        self.fail_discovery = true;
        self
    }

    /// Fail subscribe.
    #[must_use]
    pub fn fail_subscribe(mut self) -> Self {
        self.fail_subscribe = true;
        self
    }

    /// Fail reads of `uuid`.
    #[must_use]
    pub fn fail_read(mut self, uuid: Uuid) -> Self {
        self.read_failures.insert(uuid);
        self
    }

    /// Fail writes to `uuid`.
    #[must_use]
    pub fn fail_write(mut self, uuid: Uuid) -> Self {
        self.write_failures.insert(uuid);
        self
    }

    /// Build the mock transport.
    #[must_use]
    pub fn build(self) -> MockTransport {
        let transport = MockTransport::with_parts(self.advertisements, self.characteristics);
        transport.fail_scan.store(self.fail_scan, Ordering::Relaxed);
        transport
            .fail_connect
            .store(self.fail_connect, Ordering::Relaxed);
        transport
            .remaining_connect_failures
            .store(self.connect_failures, Ordering::Relaxed);
        transport
            .fail_discovery
            .store(self.fail_discovery, Ordering::Relaxed);
        transport
            .fail_subscribe
            .store(self.fail_subscribe, Ordering::Relaxed);
        MockTransport {
            read_failures: RwLock::new(self.read_failures),
            write_failures: RwLock::new(self.write_failures),
            ..transport
        }
    }
}
