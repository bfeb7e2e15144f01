//! Hardware integration tests for calypso-core
//!
//! These tests require an Ultrasonic in range and should be run with:
//! ```text
//! cargo test --package calypso-core --test hardware_tests -- --ignored --nocapture
//! ```
//!
//! Set `CALYPSO_DEVICE` to override the advertised name (default `ULTRASONIC`).

use std::env;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;

use calypso_core::delta::paths;
use calypso_core::{BleTransport, DeviceOptions, OutputRate, Status, Ultrasonic};

/// Search plus configuration must finish within this.
const BLE_TIMEOUT: Duration = Duration::from_secs(60);

fn device_name() -> String {
    env::var("CALYPSO_DEVICE").unwrap_or_else(|_| "ULTRASONIC".to_string())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("calypso_core=debug")
        .with_test_writer()
        .try_init();
}

#[tokio::test]
#[ignore = "requires BLE hardware"]
async fn test_streams_telemetry() {
    init_tracing();
    let transport = Arc::new(BleTransport::new().await.expect("no Bluetooth adapter"));
    let options = DeviceOptions::new()
        .device_name(device_name())
        .rate(OutputRate::Hz1)
        .compass(true)
        .search_timeout(BLE_TIMEOUT)
        .max_retries(1);
    let driver = Ultrasonic::new(transport, options);
    let mut deltas = driver.observations();

    driver.start().await.unwrap();
    let delta = timeout(BLE_TIMEOUT, deltas.recv())
        .await
        .expect("no telemetry within timeout")
        .unwrap();
    println!("{}", serde_json::to_string_pretty(&delta).unwrap());

    let speed = delta
        .value(paths::WIND_SPEED_APPARENT)
        .and_then(|v| v.as_f64())
        .unwrap();
    assert!(speed >= 0.0);
    driver.stop().await;
}

#[tokio::test]
#[ignore = "requires BLE hardware"]
async fn test_reads_device_info() {
    init_tracing();
    let transport = Arc::new(BleTransport::new().await.expect("no Bluetooth adapter"));
    let options = DeviceOptions::new()
        .device_name(device_name())
        .search_timeout(BLE_TIMEOUT)
        .max_retries(1);
    let driver = Ultrasonic::new(transport, options);
    let mut info = driver.device_info();
    let mut status = driver.status();

    driver.start().await.unwrap();
    let record = timeout(BLE_TIMEOUT, info.recv())
        .await
        .expect("no device info within timeout")
        .unwrap();
    println!("{}", record);

    driver.stop().await;
    while let Ok(event) = status.try_recv() {
        println!("  {}", event);
        assert_ne!(event.status, Status::RetriesExhausted);
    }
}
