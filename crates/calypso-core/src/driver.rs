//! The Ultrasonic driver and its connection lifecycle.
//!
//! [`Ultrasonic`] is the host-facing handle. Each call to
//! [`Ultrasonic::start`] spawns one session task that owns the whole
//! connection state machine:
//!
//! ```text
//! Idle -> Searching -> Connecting -> Connected -> Subscribing -> Steady
//!            ^                                                    |
//!            +----------------------- Retrying <------------------+
//! ```
//!
//! Search timeouts, failed connects and dropped links all go through
//! Retrying, which tears the link down and waits for the backoff before the
//! next search. [`Ultrasonic::stop`] cancels the session from any state.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use calypso_core::{BleTransport, DeviceOptions, OutputRate, Ultrasonic};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = Arc::new(BleTransport::new().await?);
//!     let options = DeviceOptions::new().rate(OutputRate::Hz4).compass(true);
//!     let driver = Ultrasonic::new(transport, options);
//!
//!     let mut deltas = driver.observations();
//!     driver.start().await?;
//!     while let Ok(delta) = deltas.recv().await {
//!         println!("{}", serde_json::to_string(&delta)?);
//!     }
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use calypso_types::{DeviceInfoRecord, Observation};

use crate::configurator::{
    CharacteristicOutcome, ConfigOperation, ConfigOutcome, DeviceConfigurator,
};
use crate::delta::{Delta, ObservationPublisher};
use crate::error::Result;
use crate::events::{ConnectionState, EventDispatcher, Status, StatusEvent};
use crate::options::DeviceOptions;
use crate::retry::{RetryDecision, RetryState};
use crate::transport::{
    Advertisement, AdvertisementStream, DiscoveredCharacteristic, NotificationStream, Transport,
};
use crate::util::names_match;

/// Output side shared by the handle and its session task.
#[derive(Clone)]
struct Ports {
    observations: EventDispatcher<Delta>,
    status: EventDispatcher<StatusEvent>,
    device_info: EventDispatcher<DeviceInfoRecord>,
    state: Arc<watch::Sender<ConnectionState>>,
}

impl Ports {
    fn new() -> Self {
        let (state, _) = watch::channel(ConnectionState::Idle);
        Self {
            observations: EventDispatcher::default(),
            status: EventDispatcher::default(),
            device_info: EventDispatcher::default(),
            state: Arc::new(state),
        }
    }

    fn emit(&self, event: StatusEvent) {
        if event.status.is_failure() {
            warn!(status = %event.status, "{}", event);
        } else {
            info!(status = %event.status, "{}", event);
        }
        self.status.send(event);
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(%previous, %state, "Connection state changed");
        }
    }
}

struct Session {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Driver for one Calypso Ultrasonic anemometer.
///
/// Outputs are broadcast: every receiver obtained from [`observations`],
/// [`status`] or [`device_info`] sees every event sent after it subscribed.
///
/// [`observations`]: Ultrasonic::observations
/// [`status`]: Ultrasonic::status
/// [`device_info`]: Ultrasonic::device_info
pub struct Ultrasonic {
    transport: Arc<dyn Transport>,
    options: DeviceOptions,
    ports: Ports,
    session: Mutex<Option<Session>>,
}

impl std::fmt::Debug for Ultrasonic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ultrasonic")
            .field("options", &self.options)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Ultrasonic {
    /// Create a driver over `transport`. Nothing happens until [`start`].
    ///
    /// [`start`]: Ultrasonic::start
    pub fn new(transport: Arc<dyn Transport>, options: DeviceOptions) -> Self {
        Self {
            transport,
            options,
            ports: Ports::new(),
            session: Mutex::new(None),
        }
    }

    /// Start a session.
    ///
    /// A no-op while a session is running. After [`stop`] or after the
    /// retries ran out, this starts a fresh session with a reset retry
    /// counter.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidConfig`] if the options do not validate.
    ///
    /// [`stop`]: Ultrasonic::stop
    pub async fn start(&self) -> Result<()> {
        self.options.validate()?;

        let mut session = self.session.lock().await;
        if let Some(active) = session.as_ref()
            && !active.handle.is_finished()
        {
            debug!("Session already running");
            return Ok(());
        }

        let cancel = CancellationToken::new();
        let task = SessionTask::new(
            Arc::clone(&self.transport),
            self.options.clone(),
            self.ports.clone(),
            cancel.clone(),
        );
        let span = info_span!("ultrasonic", device = %self.options.device_name);
        let handle = tokio::spawn(task.run().instrument(span));

        *session = Some(Session { cancel, handle });
        Ok(())
    }

    /// Stop the session and wait for it to tear down.
    ///
    /// Safe to call any number of times, including before [`start`]; the
    /// state is [`ConnectionState::Stopped`] afterwards.
    ///
    /// [`start`]: Ultrasonic::start
    pub async fn stop(&self) {
        let session = self.session.lock().await.take();
        if let Some(Session { cancel, handle }) = session {
            cancel.cancel();
            if let Err(e) = handle.await {
                warn!("Session task ended abnormally: {}", e);
            }
        }
        self.ports.set_state(ConnectionState::Stopped);
    }

    /// Receive delta envelopes, one per decoded telemetry frame.
    pub fn observations(&self) -> broadcast::Receiver<Delta> {
        self.ports.observations.subscribe()
    }

    /// Receive status events.
    pub fn status(&self) -> broadcast::Receiver<StatusEvent> {
        self.ports.status.subscribe()
    }

    /// Receive device information records.
    pub fn device_info(&self) -> broadcast::Receiver<DeviceInfoRecord> {
        self.ports.device_info.subscribe()
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.ports.state.borrow()
    }

    /// Watch connection state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.ports.state.subscribe()
    }

    /// Options this driver was created with.
    pub fn options(&self) -> &DeviceOptions {
        &self.options
    }
}

impl Drop for Ultrasonic {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().take() {
            session.cancel.cancel();
        }
    }
}

/// State owned by one running session.
struct SessionTask {
    transport: Arc<dyn Transport>,
    options: DeviceOptions,
    ports: Ports,
    cancel: CancellationToken,
    publisher: ObservationPublisher,
    retry: RetryState,
    configurator: DeviceConfigurator,
    peripheral: Option<String>,
    scanning: bool,
}

impl SessionTask {
    fn new(
        transport: Arc<dyn Transport>,
        options: DeviceOptions,
        ports: Ports,
        cancel: CancellationToken,
    ) -> Self {
        let configurator = DeviceConfigurator::new(&options);
        Self {
            transport,
            options,
            ports,
            cancel,
            publisher: ObservationPublisher::new(),
            retry: RetryState::new(),
            configurator,
            peripheral: None,
            scanning: false,
        }
    }

    async fn run(mut self) {
        let cancel = self.cancel.clone();

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = self.cycle() => {}
            }

            self.teardown().await;

            match self
                .retry
                .next(self.options.max_retries, &self.options.backoff)
            {
                RetryDecision::Retry { attempt, delay } => {
                    self.ports.set_state(ConnectionState::Retrying);
                    self.ports
                        .emit(StatusEvent::with_detail(Status::Retrying, attempt));
                    debug!("Waiting {:?} until retry", delay);

                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                RetryDecision::Exhausted { attempts } => {
                    self.ports.set_state(ConnectionState::Stopped);
                    self.ports
                        .emit(StatusEvent::with_detail(Status::RetriesExhausted, attempts));
                    return;
                }
            }
        }

        self.teardown().await;
        self.ports.set_state(ConnectionState::Stopped);
        self.ports.emit(StatusEvent::new(Status::Stopped));
    }

    /// One search/connect/configure cycle. Returns when a retry is needed.
    async fn cycle(&mut self) {
        let Some(peripheral) = self.search().await else {
            return;
        };
        self.peripheral = Some(peripheral.clone());

        self.ports.set_state(ConnectionState::Connecting);
        self.ports.emit(StatusEvent::new(Status::Connecting));
        if let Err(e) = self.transport.connect(&peripheral).await {
            self.ports
                .emit(StatusEvent::with_detail(Status::ConnectFailed, e));
            return;
        }

        self.ports.set_state(ConnectionState::Connected);
        self.ports.emit(StatusEvent::new(Status::Connected));

        let link_lost = watch_link(Arc::clone(&self.transport), peripheral.clone());
        tokio::select! {
            _ = link_lost => {
                self.ports
                    .emit(StatusEvent::with_detail(Status::Disconnected, "link lost"));
            }
            _ = self.linked(&peripheral) => {}
        }
    }

    /// Discover, configure and stream telemetry while the link is up.
    async fn linked(&mut self, peripheral: &str) {
        let characteristics = match self.transport.discover_characteristics(peripheral).await {
            Ok(characteristics) => characteristics,
            Err(e) => {
                self.ports
                    .emit(StatusEvent::with_detail(Status::DiscoveryFailed, e));
                if self.options.retry_on_discovery_failure {
                    return;
                }
                // Connected but unconfigured until stopped or the link drops.
                std::future::pending::<()>().await;
                return;
            }
        };

        self.configure(peripheral, characteristics).await;
    }

    /// Scan until a matching advertisement shows up or the search times out.
    async fn search(&mut self) -> Option<String> {
        self.ports.set_state(ConnectionState::Searching);
        self.ports.emit(StatusEvent::new(Status::Searching));

        let deadline = tokio::time::sleep(self.options.search_timeout);
        tokio::pin!(deadline);

        let mut advertisements = match self.transport.scan(&self.options.device_name).await {
            Ok(stream) => {
                self.scanning = true;
                Some(stream)
            }
            Err(e) => {
                // Left to the search timeout.
                self.ports.emit(StatusEvent::with_detail(Status::ScanFailed, e));
                None
            }
        };

        loop {
            tokio::select! {
                _ = &mut deadline => {
                    self.ports.emit(StatusEvent::with_detail(
                        Status::SearchTimeout,
                        format!("{:?}", self.options.search_timeout),
                    ));
                    return None;
                }
                advertisement = next_advertisement(&mut advertisements) => match advertisement {
                    Some(advertisement) => {
                        let Some(name) = advertisement.local_name.as_deref() else {
                            continue;
                        };
                        if !names_match(name, &self.options.device_name) {
                            debug!("Ignoring advertisement from {:?}", name);
                            continue;
                        }

                        self.stop_scan().await;
                        self.ports
                            .emit(StatusEvent::with_detail(Status::FoundDevice, name));
                        return Some(advertisement.id);
                    }
                    None => {
                        debug!("Scan stream ended, waiting for search timeout");
                        advertisements = None;
                    }
                }
            }
        }
    }

    /// Run the configuration pass and stream telemetry until the notification
    /// stream ends.
    async fn configure(&mut self, peripheral: &str, characteristics: Vec<DiscoveredCharacteristic>) {
        self.ports.set_state(ConnectionState::Subscribing);
        for characteristic in &characteristics {
            self.ports.emit(StatusEvent::with_detail(
                Status::ReceivedCharacteristic,
                characteristic.uuid,
            ));
        }

        let mut pending: FuturesUnordered<ConfigOperation> = self
            .configurator
            .begin(&self.transport, peripheral, &characteristics)
            .into_iter()
            .collect();

        if !self.configurator.is_subscribed() {
            self.ports.set_state(ConnectionState::Steady);
            self.ports.emit(StatusEvent::with_detail(
                Status::SubscribeFailed,
                "telemetry characteristic not found",
            ));
        }

        let mut notifications: Option<NotificationStream> = None;
        loop {
            tokio::select! {
                Some(outcome) = pending.next(), if !pending.is_empty() => {
                    if let Some(stream) = self.handle_outcome(outcome) {
                        notifications = Some(stream);
                    }
                }
                frame = next_frame(&mut notifications) => match frame {
                    Some(data) => self.publish_frame(&data),
                    None => {
                        self.ports.emit(StatusEvent::with_detail(
                            Status::Disconnected,
                            "notification stream ended",
                        ));
                        return;
                    }
                }
            }
        }
    }

    fn handle_outcome(&mut self, outcome: ConfigOutcome) -> Option<NotificationStream> {
        match outcome {
            ConfigOutcome::Characteristic(CharacteristicOutcome {
                characteristic,
                write,
                read,
            }) => {
                if let Some(Err(e)) = write {
                    self.ports.emit(StatusEvent::with_detail(
                        Status::WriteFailed,
                        format!("{}: {}", characteristic.uuid, e),
                    ));
                }

                let applied =
                    read.and_then(|data| self.configurator.apply_read(&characteristic, &data));
                match applied {
                    Ok(effects) => {
                        for record in effects.records {
                            self.ports.device_info.send(record);
                        }
                        if effects.sleeping {
                            self.ports.emit(StatusEvent::new(Status::Sleeping));
                        }
                        if let Some(observation) = effects.observation {
                            self.publish(&observation);
                        }
                    }
                    Err(e) => {
                        self.ports.emit(StatusEvent::with_detail(
                            Status::ReadFailed,
                            format!("{}: {}", characteristic.uuid, e),
                        ));
                    }
                }
                None
            }
            ConfigOutcome::Subscription { uuid, result } => match result {
                Ok(stream) => {
                    self.ports.set_state(ConnectionState::Steady);
                    self.ports
                        .emit(StatusEvent::with_detail(Status::Subscribed, uuid));
                    Some(stream)
                }
                Err(e) => {
                    self.configurator.subscription_failed();
                    self.ports.set_state(ConnectionState::Steady);
                    self.ports
                        .emit(StatusEvent::with_detail(Status::SubscribeFailed, e));
                    None
                }
            },
        }
    }

    fn publish_frame(&self, data: &[u8]) {
        match self.configurator.decode_frame(data) {
            Ok(observation) => self.publish(&observation),
            Err(e) => warn!("Dropping telemetry frame {:02X?}: {}", data, e),
        }
    }

    fn publish(&self, observation: &Observation) {
        self.ports
            .observations
            .send(self.publisher.to_delta(observation));
    }

    async fn stop_scan(&mut self) {
        if !self.scanning {
            return;
        }
        self.scanning = false;
        if let Err(e) = self.transport.stop_scan().await {
            warn!("Failed to stop scan: {}", e);
        }
    }

    /// Drop the subscription, stop scanning and disconnect.
    async fn teardown(&mut self) {
        self.configurator.reset();
        self.stop_scan().await;
        if let Some(peripheral) = self.peripheral.take()
            && let Err(e) = self.transport.disconnect(&peripheral).await
        {
            warn!("Failed to disconnect from {}: {}", peripheral, e);
        }
    }
}

async fn next_advertisement(stream: &mut Option<AdvertisementStream>) -> Option<Advertisement> {
    match stream {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

/// Resolves when the link to `peripheral` drops. If the transport cannot
/// watch the link, only the end of the notification stream is noticed.
async fn watch_link(transport: Arc<dyn Transport>, peripheral: String) {
    if let Err(e) = transport.disconnected(&peripheral).await {
        warn!("Cannot watch link to {}: {}", peripheral, e);
        std::future::pending::<()>().await;
    }
}

async fn next_frame(stream: &mut Option<NotificationStream>) -> Option<Vec<u8>> {
    match stream {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}
