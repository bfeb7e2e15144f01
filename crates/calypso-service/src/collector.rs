//! Forwarding driver output to the host.
//!
//! Deltas are written to the output as one JSON object per line. Status
//! events and device information go to the log.

use std::future::Future;
use std::io::Write;

use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

use calypso_core::{Status, Ultrasonic};

/// Runs a driver and forwards its output until shutdown.
pub struct Collector<W> {
    driver: Ultrasonic,
    output: W,
}

/// How the collector stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    /// The shutdown future completed.
    Shutdown,
    /// The driver ran out of retries.
    RetriesExhausted,
}

impl<W: Write> Collector<W> {
    /// Create a collector writing deltas to `output`.
    pub fn new(driver: Ultrasonic, output: W) -> Self {
        Self { driver, output }
    }

    /// Start the driver and forward its output until `shutdown` completes or
    /// the driver gives up. The driver is stopped before this returns.
    pub async fn run<F>(mut self, shutdown: F) -> Result<(Exit, W), CollectorError>
    where
        F: Future<Output = ()>,
    {
        let mut deltas = self.driver.observations();
        let mut status = self.driver.status();
        let mut device_info = self.driver.device_info();

        self.driver.start().await.map_err(CollectorError::Start)?;
        info!(
            "Collecting from {:?}",
            self.driver.options().device_name
        );

        tokio::pin!(shutdown);
        let result = loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutting down");
                    break Ok(Exit::Shutdown);
                }
                delta = deltas.recv() => match delta {
                    Ok(delta) => {
                        if let Err(e) = serde_json::to_writer(&mut self.output, &delta)
                            .map_err(CollectorError::Encode)
                            .and_then(|()| {
                                writeln!(self.output)
                                    .and_then(|()| self.output.flush())
                                    .map_err(CollectorError::Write)
                            })
                        {
                            break Err(e);
                        }
                    }
                    Err(RecvError::Lagged(missed)) => warn!("Dropped {} deltas", missed),
                    Err(RecvError::Closed) => break Ok(Exit::Shutdown),
                },
                event = status.recv() => match event {
                    Ok(event) if event.status == Status::RetriesExhausted => {
                        error!("{}", event);
                        break Ok(Exit::RetriesExhausted);
                    }
                    // The driver already logs status events.
                    Ok(_) => {}
                    Err(RecvError::Lagged(missed)) => warn!("Dropped {} status events", missed),
                    Err(RecvError::Closed) => break Ok(Exit::Shutdown),
                },
                record = device_info.recv() => match record {
                    Ok(record) => info!("{}", record),
                    Err(RecvError::Lagged(missed)) => warn!("Dropped {} device info records", missed),
                    Err(RecvError::Closed) => break Ok(Exit::Shutdown),
                },
            }
        };

        self.driver.stop().await;
        result.map(|exit| (exit, self.output))
    }
}

/// Collector errors.
#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    #[error("Failed to start driver: {0}")]
    Start(calypso_core::Error),
    #[error("Failed to encode delta: {0}")]
    Encode(serde_json::Error),
    #[error("Failed to write delta: {0}")]
    Write(std::io::Error),
}
