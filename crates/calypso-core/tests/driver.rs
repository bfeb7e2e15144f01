//! Session lifecycle tests for the Ultrasonic driver, run against the mock
//! transport on a paused clock.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{Instant, timeout};

use calypso_core::delta::paths;
use calypso_core::mock::{MOCK_PERIPHERAL_ID, Operation, SAMPLE_FRAME};
use calypso_core::{
    Advertisement, ConnectionState, Delta, DeviceInfoKind, DeviceInfoRecord, DeviceOptions,
    InfoValue, MockTransport, MockTransportBuilder, OutputRate, Status, StatusEvent, Ultrasonic,
    uuids,
};

/// Records produced by the full mock device: six device info strings plus
/// six state values.
const FULL_RECORD_COUNT: usize = 12;

const WAIT: Duration = Duration::from_secs(600);

async fn wait_for(rx: &mut broadcast::Receiver<StatusEvent>, status: Status) -> StatusEvent {
    timeout(WAIT, async {
        loop {
            match rx.recv().await {
                Ok(event) if event.status == status => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("status port closed"),
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {:?}", status))
}

async fn collect_records(
    rx: &mut broadcast::Receiver<DeviceInfoRecord>,
    count: usize,
) -> Vec<DeviceInfoRecord> {
    timeout(WAIT, async {
        let mut records = Vec::with_capacity(count);
        while records.len() < count {
            records.push(rx.recv().await.unwrap());
        }
        records
    })
    .await
    .expect("timed out waiting for device info")
}

async fn wait_for_delta(
    rx: &mut broadcast::Receiver<Delta>,
    predicate: impl Fn(&Delta) -> bool,
) -> Delta {
    timeout(WAIT, async {
        loop {
            let delta = rx.recv().await.unwrap();
            if predicate(&delta) {
                return delta;
            }
        }
    })
    .await
    .expect("timed out waiting for delta")
}

fn drain(rx: &mut broadcast::Receiver<StatusEvent>) -> Vec<StatusEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn record(records: &[DeviceInfoRecord], kind: DeviceInfoKind) -> &InfoValue {
    &records
        .iter()
        .find(|r| r.kind == kind)
        .unwrap_or_else(|| panic!("no {:?} record", kind))
        .value
}

#[tokio::test(start_paused = true)]
async fn test_connects_configures_and_streams() {
    let transport = Arc::new(MockTransport::ultrasonic());
    let options = DeviceOptions::new().rate(OutputRate::Hz8).compass(true);
    let driver = Ultrasonic::new(transport.clone(), options);

    let mut status = driver.status();
    let mut info = driver.device_info();
    let mut deltas = driver.observations();

    driver.start().await.unwrap();
    wait_for(&mut status, Status::Subscribed).await;
    assert_eq!(driver.state(), ConnectionState::Steady);

    let records = collect_records(&mut info, FULL_RECORD_COUNT).await;
    assert_eq!(
        record(&records, DeviceInfoKind::Manufacturer),
        &InfoValue::Text("Calypso Instruments".to_string())
    );
    assert_eq!(
        record(&records, DeviceInfoKind::SamplingSpeed),
        &InfoValue::Number(8.0)
    );
    assert_eq!(
        record(&records, DeviceInfoKind::CompassState),
        &InfoValue::Number(1.0)
    );

    let mut writes = transport.writes().await;
    writes.sort();
    let mut expected = vec![(uuids::DATA_RATE, vec![8]), (uuids::COMPASS, vec![1])];
    expected.sort();
    assert_eq!(writes, expected);

    for uuid in [
        uuids::MANUFACTURER_NAME,
        uuids::SERIAL_NUMBER,
        uuids::OPERATING_MODE,
        uuids::DATA_RATE,
        uuids::COMPASS,
        uuids::ANGLE_OFFSET,
        uuids::CALIBRATION,
        uuids::WIND_SPEED_CORRECTION,
    ] {
        assert_eq!(transport.read_count(uuid).await, 1, "reads of {}", uuid);
    }
    assert_eq!(transport.subscribe_count().await, 1);

    assert!(transport.notify(&SAMPLE_FRAME).await);
    let delta = wait_for_delta(&mut deltas, |d| d.value(paths::ATTITUDE_ROLL).is_some()).await;
    assert_eq!(
        delta.value(paths::WIND_SPEED_APPARENT).and_then(|v| v.as_f64()),
        Some(10.0)
    );
    assert_eq!(delta.updates[0].values.len(), 10);

    driver.stop().await;
    let events = drain(&mut status);
    assert_eq!(events.last().map(|e| e.status), Some(Status::Stopped));
    assert_eq!(driver.state(), ConnectionState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_status_order() {
    let transport = Arc::new(MockTransport::ultrasonic());
    let driver = Ultrasonic::new(transport, DeviceOptions::default());
    let mut status = driver.status();

    driver.start().await.unwrap();
    let mut seen = Vec::new();
    timeout(WAIT, async {
        loop {
            let event = status.recv().await.unwrap();
            let done = event.status == Status::Subscribed;
            seen.push(event);
            if done {
                break;
            }
        }
    })
    .await
    .unwrap();
    driver.stop().await;

    assert_eq!(seen[0].status, Status::Searching);
    assert_eq!(seen[1].status, Status::FoundDevice);
    assert_eq!(seen[1].detail, "ULTRASONIC");
    assert_eq!(seen[2].status, Status::Connecting);
    assert_eq!(seen[3].status, Status::Connected);
    let received: Vec<&StatusEvent> = seen
        .iter()
        .filter(|e| e.status == Status::ReceivedCharacteristic)
        .collect();
    assert_eq!(received.len(), 13);
    assert_eq!(received[0].detail, uuids::MANUFACTURER_NAME.to_string());
}

#[tokio::test(start_paused = true)]
async fn test_no_writes_without_configuration() {
    let transport = Arc::new(MockTransport::ultrasonic());
    let driver = Ultrasonic::new(transport.clone(), DeviceOptions::default());
    let mut info = driver.device_info();

    driver.start().await.unwrap();
    let records = collect_records(&mut info, FULL_RECORD_COUNT).await;
    driver.stop().await;

    assert!(transport.writes().await.is_empty());
    assert_eq!(
        record(&records, DeviceInfoKind::SamplingSpeed),
        &InfoValue::Number(4.0)
    );
}

#[tokio::test(start_paused = true)]
async fn test_compass_off_omits_attitude() {
    let transport = Arc::new(MockTransport::ultrasonic());
    let driver = Ultrasonic::new(transport.clone(), DeviceOptions::new().compass(false));
    let mut status = driver.status();
    let mut info = driver.device_info();
    let mut deltas = driver.observations();

    driver.start().await.unwrap();
    wait_for(&mut status, Status::Subscribed).await;
    collect_records(&mut info, FULL_RECORD_COUNT).await;
    while deltas.try_recv().is_ok() {}

    assert!(transport.notify(&SAMPLE_FRAME).await);
    let delta = deltas.recv().await.unwrap();
    driver.stop().await;

    assert_eq!(delta.updates[0].values.len(), 6);
    assert!(delta.value(paths::ATTITUDE_ROLL).is_none());
    assert!(delta.value(paths::HEADING_MAGNETIC).is_none());
    assert_eq!(transport.writes().await, vec![(uuids::COMPASS, vec![0])]);
}

#[tokio::test(start_paused = true)]
async fn test_malformed_frame_is_dropped() {
    let transport = Arc::new(MockTransport::ultrasonic());
    let driver = Ultrasonic::new(transport.clone(), DeviceOptions::default());
    let mut status = driver.status();
    let mut info = driver.device_info();
    let mut deltas = driver.observations();

    driver.start().await.unwrap();
    wait_for(&mut status, Status::Subscribed).await;
    collect_records(&mut info, FULL_RECORD_COUNT).await;
    while deltas.try_recv().is_ok() {}

    assert!(transport.notify(&[1, 2, 3]).await);
    let mut frame = SAMPLE_FRAME;
    frame[0] = 0xF4; // 5.00 m/s
    frame[1] = 0x01;
    assert!(transport.notify(&frame).await);

    wait_for_delta(&mut deltas, |d| {
        d.value(paths::WIND_SPEED_APPARENT).and_then(|v| v.as_f64()) == Some(5.0)
    })
    .await;
    assert_eq!(driver.state(), ConnectionState::Steady);
    driver.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_retries_exhausted_when_device_absent() {
    let transport = Arc::new(MockTransport::new());
    let driver = Ultrasonic::new(transport.clone(), DeviceOptions::new().max_retries(1));
    let mut status = driver.status();

    let started = Instant::now();
    driver.start().await.unwrap();
    let exhausted = wait_for(&mut status, Status::RetriesExhausted).await;
    let elapsed = started.elapsed();

    assert_eq!(exhausted.detail, "1");
    assert_eq!(transport.scan_count(), 2);
    assert_eq!(driver.state(), ConnectionState::Stopped);

    // Two full searches plus one 250 ms backoff.
    assert!(elapsed >= Duration::from_millis(240_250), "{:?}", elapsed);
    assert!(elapsed < Duration::from_secs(241), "{:?}", elapsed);
}

#[tokio::test(start_paused = true)]
async fn test_search_timeout_then_retry_sequence() {
    let transport = Arc::new(MockTransport::new());
    let driver = Ultrasonic::new(transport, DeviceOptions::new().max_retries(2));
    let mut status = driver.status();
    driver.start().await.unwrap();

    let mut sequence = Vec::new();
    timeout(WAIT, async {
        loop {
            let event = status.recv().await.unwrap();
            let done = event.status == Status::RetriesExhausted;
            sequence.push((event.status, event.detail));
            if done {
                break;
            }
        }
    })
    .await
    .unwrap();

    let statuses: Vec<Status> = sequence.iter().map(|(s, _)| *s).collect();
    assert_eq!(
        statuses,
        vec![
            Status::Searching,
            Status::SearchTimeout,
            Status::Retrying,
            Status::Searching,
            Status::SearchTimeout,
            Status::Retrying,
            Status::Searching,
            Status::SearchTimeout,
            Status::RetriesExhausted,
        ]
    );
    assert_eq!(sequence[2].1, "1");
    assert_eq!(sequence[5].1, "2");
    assert_eq!(sequence[8].1, "2");
}

#[tokio::test(start_paused = true)]
async fn test_scan_failure_waits_for_search_timeout() {
    let transport = Arc::new(MockTransportBuilder::ultrasonic().fail_scan().build());
    let driver = Ultrasonic::new(transport.clone(), DeviceOptions::new().max_retries(1));
    let mut status = driver.status();

    let started = Instant::now();
    driver.start().await.unwrap();
    wait_for(&mut status, Status::ScanFailed).await;
    wait_for(&mut status, Status::SearchTimeout).await;
    assert!(started.elapsed() >= Duration::from_secs(120));

    wait_for(&mut status, Status::RetriesExhausted).await;
    assert_eq!(transport.connect_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_connect_failure_retries_and_recovers() {
    let transport = Arc::new(MockTransportBuilder::ultrasonic().connect_failures(1).build());
    let driver = Ultrasonic::new(transport.clone(), DeviceOptions::default());
    let mut status = driver.status();

    driver.start().await.unwrap();
    wait_for(&mut status, Status::ConnectFailed).await;
    let retrying = wait_for(&mut status, Status::Retrying).await;
    assert_eq!(retrying.detail, "1");

    wait_for(&mut status, Status::Subscribed).await;
    assert_eq!(transport.connect_count(), 2);
    assert_eq!(transport.scan_count(), 2);
    driver.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_subscribe_failure_degrades_without_retry() {
    let transport = Arc::new(MockTransportBuilder::ultrasonic().fail_subscribe().build());
    let driver = Ultrasonic::new(transport.clone(), DeviceOptions::default());
    let mut status = driver.status();
    let mut info = driver.device_info();

    driver.start().await.unwrap();
    wait_for(&mut status, Status::SubscribeFailed).await;
    collect_records(&mut info, FULL_RECORD_COUNT).await;

    tokio::time::sleep(WAIT).await;
    assert_eq!(driver.state(), ConnectionState::Steady);
    assert_eq!(transport.scan_count(), 1);
    assert!(transport.is_connected());
    driver.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_missing_telemetry_characteristic() {
    let transport = Arc::new(
        MockTransportBuilder::ultrasonic()
            .without_characteristic(uuids::TELEMETRY)
            .build(),
    );
    let driver = Ultrasonic::new(transport.clone(), DeviceOptions::default());
    let mut status = driver.status();

    driver.start().await.unwrap();
    let failed = wait_for(&mut status, Status::SubscribeFailed).await;
    assert_eq!(failed.detail, "telemetry characteristic not found");
    assert_eq!(driver.state(), ConnectionState::Steady);
    assert_eq!(transport.subscribe_count().await, 0);
    driver.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_link_drop_triggers_retry() {
    let transport = Arc::new(MockTransport::ultrasonic());
    let driver = Ultrasonic::new(transport.clone(), DeviceOptions::default());
    let mut status = driver.status();

    driver.start().await.unwrap();
    wait_for(&mut status, Status::Subscribed).await;

    transport.drop_link().await;
    wait_for(&mut status, Status::Disconnected).await;
    let retrying = wait_for(&mut status, Status::Retrying).await;
    assert_eq!(retrying.detail, "1");

    wait_for(&mut status, Status::Subscribed).await;
    assert_eq!(transport.subscribe_count().await, 2);
    assert_eq!(transport.connect_count(), 2);
    driver.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_link_drop_without_telemetry_triggers_retry() {
    let transport = Arc::new(MockTransportBuilder::ultrasonic().fail_subscribe().build());
    let driver = Ultrasonic::new(transport.clone(), DeviceOptions::default());
    let mut status = driver.status();

    driver.start().await.unwrap();
    wait_for(&mut status, Status::SubscribeFailed).await;
    assert_eq!(driver.state(), ConnectionState::Steady);

    transport.drop_link().await;
    let lost = wait_for(&mut status, Status::Disconnected).await;
    assert_eq!(lost.detail, "link lost");
    let retrying = wait_for(&mut status, Status::Retrying).await;
    assert_eq!(retrying.detail, "1");

    wait_for(&mut status, Status::Connected).await;
    assert_eq!(transport.connect_count(), 2);
    assert_eq!(transport.scan_count(), 2);
    driver.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_link_drop_after_discovery_failure_triggers_retry() {
    let transport = Arc::new(MockTransportBuilder::ultrasonic().fail_discovery().build());
    let driver = Ultrasonic::new(transport.clone(), DeviceOptions::default());
    let mut status = driver.status();

    driver.start().await.unwrap();
    wait_for(&mut status, Status::DiscoveryFailed).await;

    transport.drop_link().await;
    wait_for(&mut status, Status::Disconnected).await;
    wait_for(&mut status, Status::Retrying).await;
    wait_for(&mut status, Status::DiscoveryFailed).await;
    assert_eq!(transport.connect_count(), 2);
    driver.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_telemetry_characteristic_subscribes_once() {
    let transport = Arc::new(
        MockTransportBuilder::ultrasonic()
            .characteristic(uuids::TELEMETRY, SAMPLE_FRAME.to_vec())
            .build(),
    );
    let driver = Ultrasonic::new(transport.clone(), DeviceOptions::default());
    let mut status = driver.status();

    driver.start().await.unwrap();
    wait_for(&mut status, Status::Subscribed).await;
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(transport.subscribe_count().await, 1);
    assert_eq!(transport.read_count(uuids::TELEMETRY).await, 2);
    assert_eq!(driver.state(), ConnectionState::Steady);
    driver.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_discovery_failure_stays_connected() {
    let transport = Arc::new(MockTransportBuilder::ultrasonic().fail_discovery().build());
    let driver = Ultrasonic::new(transport.clone(), DeviceOptions::default());
    let mut status = driver.status();

    driver.start().await.unwrap();
    wait_for(&mut status, Status::DiscoveryFailed).await;

    tokio::time::sleep(WAIT).await;
    assert_eq!(driver.state(), ConnectionState::Connected);
    assert_eq!(transport.connect_count(), 1);
    assert_eq!(transport.scan_count(), 1);

    driver.stop().await;
    assert!(
        transport
            .operations()
            .await
            .contains(&Operation::Disconnect(MOCK_PERIPHERAL_ID.to_string()))
    );
    assert!(!transport.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_discovery_failure_can_retry() {
    let transport = Arc::new(MockTransportBuilder::ultrasonic().fail_discovery().build());
    let options = DeviceOptions::new()
        .max_retries(2)
        .retry_on_discovery_failure(true);
    let driver = Ultrasonic::new(transport.clone(), options);
    let mut status = driver.status();

    driver.start().await.unwrap();
    wait_for(&mut status, Status::RetriesExhausted).await;
    assert_eq!(transport.connect_count(), 3);
    assert_eq!(driver.state(), ConnectionState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_write_failure_still_reads_back() {
    let transport = Arc::new(MockTransportBuilder::ultrasonic().fail_write(uuids::COMPASS).build());
    let driver = Ultrasonic::new(transport.clone(), DeviceOptions::new().compass(true));
    let mut status = driver.status();
    let mut info = driver.device_info();

    driver.start().await.unwrap();
    let failed = wait_for(&mut status, Status::WriteFailed).await;
    assert!(failed.detail.starts_with(&uuids::COMPASS.to_string()));

    let records = collect_records(&mut info, FULL_RECORD_COUNT).await;
    assert_eq!(
        record(&records, DeviceInfoKind::CompassState),
        &InfoValue::Number(0.0)
    );
    assert_eq!(transport.read_count(uuids::COMPASS).await, 1);
    driver.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_read_failure_is_reported() {
    let transport = Arc::new(
        MockTransportBuilder::ultrasonic()
            .fail_read(uuids::SERIAL_NUMBER)
            .build(),
    );
    let driver = Ultrasonic::new(transport, DeviceOptions::default());
    let mut status = driver.status();

    driver.start().await.unwrap();
    let failed = wait_for(&mut status, Status::ReadFailed).await;
    assert!(failed.detail.starts_with(&uuids::SERIAL_NUMBER.to_string()));
    assert_ne!(driver.state(), ConnectionState::Retrying);
    driver.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_sleep_mode_is_reported() {
    let transport = Arc::new(MockTransport::ultrasonic());
    transport.set_value(uuids::OPERATING_MODE, vec![0]).await;
    let driver = Ultrasonic::new(transport, DeviceOptions::default());
    let mut status = driver.status();

    driver.start().await.unwrap();
    wait_for(&mut status, Status::Sleeping).await;
    driver.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_stop_tears_down_and_is_idempotent() {
    let transport = Arc::new(MockTransport::ultrasonic());
    let driver = Ultrasonic::new(transport.clone(), DeviceOptions::default());
    let mut status = driver.status();

    driver.start().await.unwrap();
    wait_for(&mut status, Status::Subscribed).await;

    driver.stop().await;
    driver.stop().await;
    assert_eq!(driver.state(), ConnectionState::Stopped);
    assert!(!transport.is_connected());
    assert!(!transport.notify(&SAMPLE_FRAME).await);

    let stopped = drain(&mut status)
        .into_iter()
        .filter(|e| e.status == Status::Stopped)
        .count();
    assert_eq!(stopped, 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_while_searching() {
    let transport = Arc::new(MockTransport::new());
    let driver = Ultrasonic::new(transport.clone(), DeviceOptions::default());
    let mut status = driver.status();

    driver.start().await.unwrap();
    wait_for(&mut status, Status::Searching).await;
    driver.stop().await;

    wait_for(&mut status, Status::Stopped).await;
    assert!(transport.operations().await.contains(&Operation::StopScan));
    assert_eq!(transport.connect_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_restart_after_exhaustion() {
    let transport = Arc::new(MockTransport::ultrasonic());
    transport.set_advertisements(Vec::new()).await;
    let driver = Ultrasonic::new(transport.clone(), DeviceOptions::new().max_retries(1));
    let mut status = driver.status();

    driver.start().await.unwrap();
    wait_for(&mut status, Status::RetriesExhausted).await;
    assert_eq!(driver.state(), ConnectionState::Stopped);

    transport
        .set_advertisements(vec![Advertisement::named(MOCK_PERIPHERAL_ID, "ULTRASONIC")])
        .await;
    driver.start().await.unwrap();
    wait_for(&mut status, Status::Subscribed).await;
    assert_eq!(driver.state(), ConnectionState::Steady);
    driver.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_name_match_is_exact_and_case_insensitive() {
    let transport = Arc::new(MockTransport::ultrasonic());
    transport
        .set_advertisements(vec![
            Advertisement {
                id: "anonymous".to_string(),
                local_name: None,
                rssi: Some(-40),
            },
            Advertisement::named("decoy", "ULTRASONIC-2"),
            Advertisement::named(MOCK_PERIPHERAL_ID, "ultrasonic"),
        ])
        .await;
    let driver = Ultrasonic::new(transport.clone(), DeviceOptions::default());
    let mut status = driver.status();

    driver.start().await.unwrap();
    let found = wait_for(&mut status, Status::FoundDevice).await;
    assert_eq!(found.detail, "ultrasonic");
    wait_for(&mut status, Status::Connected).await;
    driver.stop().await;

    let connects: Vec<Operation> = transport
        .operations()
        .await
        .into_iter()
        .filter(|op| matches!(op, Operation::Connect(_)))
        .collect();
    assert_eq!(
        connects,
        vec![Operation::Connect(MOCK_PERIPHERAL_ID.to_string())]
    );
}
