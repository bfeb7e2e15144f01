//! Status events and output ports.
//!
//! The driver talks to its host through three broadcast ports (observations,
//! status, device info) and one watch channel holding the current
//! [`ConnectionState`].

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Lifecycle state of a driver session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No session has been started yet.
    #[default]
    Idle,
    /// Scanning for an advertisement with the configured name.
    Searching,
    /// Connecting to the matched peripheral.
    Connecting,
    /// Link is up, characteristics are being discovered.
    Connected,
    /// Configuration pass running, telemetry subscription requested.
    Subscribing,
    /// Configuration done; telemetry flows unless the subscription failed.
    Steady,
    /// Link torn down, waiting for the backoff before the next search.
    Retrying,
    /// Session ended by `stop()` or by running out of retries.
    Stopped,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Searching => "searching",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Subscribing => "subscribing",
            ConnectionState::Steady => "steady",
            ConnectionState::Retrying => "retrying",
            ConnectionState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Status tokens emitted on the status port.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new statuses
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum Status {
    Searching,
    FoundDevice,
    Connecting,
    Connected,
    ReceivedCharacteristic,
    Subscribed,
    Sleeping,
    Retrying,
    RetriesExhausted,
    Stopped,
    ScanFailed,
    SearchTimeout,
    ConnectFailed,
    DiscoveryFailed,
    WriteFailed,
    ReadFailed,
    SubscribeFailed,
    Disconnected,
}

impl Status {
    /// Machine-readable token, as serialized.
    pub fn token(&self) -> &'static str {
        match self {
            Status::Searching => "searching",
            Status::FoundDevice => "found_device",
            Status::Connecting => "connecting",
            Status::Connected => "connected",
            Status::ReceivedCharacteristic => "received_characteristic",
            Status::Subscribed => "subscribed",
            Status::Sleeping => "sleeping",
            Status::Retrying => "retrying",
            Status::RetriesExhausted => "retries_exhausted",
            Status::Stopped => "stopped",
            Status::ScanFailed => "scan_failed",
            Status::SearchTimeout => "search_timeout",
            Status::ConnectFailed => "connect_failed",
            Status::DiscoveryFailed => "discovery_failed",
            Status::WriteFailed => "write_failed",
            Status::ReadFailed => "read_failed",
            Status::SubscribeFailed => "subscribe_failed",
            Status::Disconnected => "disconnected",
        }
    }

    /// Human-readable description shown to operators.
    pub fn description(&self) -> &'static str {
        match self {
            Status::Searching => "Searching for Ultrasonic",
            Status::FoundDevice => "Found Ultrasonic",
            Status::Connecting => "Connecting...",
            Status::Connected => "Connected to Ultrasonic",
            Status::ReceivedCharacteristic => "Received characteristic",
            Status::Subscribed => "Subscribed to data service",
            Status::Sleeping => "Ultrasonic in sleep mode...",
            Status::Retrying => "Retrying to connect, retry",
            Status::RetriesExhausted => "Giving up, no retries left",
            Status::Stopped => "Stopped",
            Status::ScanFailed => "Could not start scanning",
            Status::SearchTimeout => "Ultrasonic not found",
            Status::ConnectFailed => "Connection failed",
            Status::DiscoveryFailed => "Characteristic discovery failed",
            Status::WriteFailed => "Configuration write failed",
            Status::ReadFailed => "Characteristic read failed",
            Status::SubscribeFailed => "Telemetry subscription failed",
            Status::Disconnected => "Ultrasonic disconnected",
        }
    }

    /// Whether this status reports a failure.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Status::RetriesExhausted
                | Status::ScanFailed
                | Status::SearchTimeout
                | Status::ConnectFailed
                | Status::DiscoveryFailed
                | Status::WriteFailed
                | Status::ReadFailed
                | Status::SubscribeFailed
                | Status::Disconnected
        )
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// A status notification with optional detail (error text, attempt number,
/// characteristic id, device name).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub status: Status,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub detail: String,
}

impl StatusEvent {
    /// Create an event without detail.
    pub fn new(status: Status) -> Self {
        Self {
            status,
            detail: String::new(),
        }
    }

    /// Create an event with detail.
    pub fn with_detail(status: Status, detail: impl ToString) -> Self {
        Self {
            status,
            detail: detail.to_string(),
        }
    }
}

impl fmt::Display for StatusEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.detail.is_empty() {
            f.write_str(self.status.description())
        } else {
            write!(f, "{}: {}", self.status.description(), self.detail)
        }
    }
}

/// Default capacity of each output port.
pub const DEFAULT_PORT_CAPACITY: usize = 100;

/// Broadcast port for one kind of output.
#[derive(Debug)]
pub struct EventDispatcher<T> {
    sender: broadcast::Sender<T>,
}

impl<T> Clone for EventDispatcher<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<T: Clone> EventDispatcher<T> {
    /// Create a new dispatcher.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.sender.subscribe()
    }

    /// Send an event.
    pub fn send(&self, event: T) {
        // Ignore error if no receivers
        let _ = self.sender.send(event);
    }

    /// Get the number of active receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl<T: Clone> Default for EventDispatcher<T> {
    fn default() -> Self {
        Self::new(DEFAULT_PORT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_event_display() {
        let event = StatusEvent::with_detail(Status::Retrying, 3);
        assert_eq!(event.to_string(), "Retrying to connect, retry: 3");

        let event = StatusEvent::new(Status::Searching);
        assert_eq!(event.to_string(), "Searching for Ultrasonic");
    }

    #[test]
    fn test_status_tokens_match_serde() {
        for status in [
            Status::FoundDevice,
            Status::ReceivedCharacteristic,
            Status::RetriesExhausted,
            Status::SubscribeFailed,
        ] {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.token()));
        }
    }

    #[test]
    fn test_status_event_serialization() {
        let json = serde_json::to_string(&StatusEvent::new(Status::Connected)).unwrap();
        assert_eq!(json, r#"{"status":"connected"}"#);

        let json =
            serde_json::to_string(&StatusEvent::with_detail(Status::ReadFailed, "timeout")).unwrap();
        assert_eq!(json, r#"{"status":"read_failed","detail":"timeout"}"#);

        let event: StatusEvent = serde_json::from_str(r#"{"status":"stopped"}"#).unwrap();
        assert_eq!(event, StatusEvent::new(Status::Stopped));
    }

    #[test]
    fn test_failure_classification() {
        assert!(Status::ConnectFailed.is_failure());
        assert!(Status::Disconnected.is_failure());
        assert!(!Status::Subscribed.is_failure());
        assert!(!Status::Retrying.is_failure());
    }

    #[tokio::test]
    async fn test_dispatcher_fans_out() {
        let dispatcher = EventDispatcher::<StatusEvent>::default();
        let mut a = dispatcher.subscribe();
        let mut b = dispatcher.subscribe();
        assert_eq!(dispatcher.receiver_count(), 2);

        dispatcher.send(StatusEvent::new(Status::Searching));

        assert_eq!(a.recv().await.unwrap().status, Status::Searching);
        assert_eq!(b.recv().await.unwrap().status, Status::Searching);
    }

    #[test]
    fn test_send_without_receivers_is_ignored() {
        let dispatcher = EventDispatcher::<u32>::new(4);
        dispatcher.send(1);
        assert_eq!(dispatcher.receiver_count(), 0);
    }

    #[test]
    fn test_connection_state_default() {
        assert_eq!(ConnectionState::default(), ConnectionState::Idle);
        assert_eq!(ConnectionState::Steady.to_string(), "steady");
    }
}
