//! One-shot device configuration after characteristic discovery.
//!
//! For every discovered characteristic, in discovery order, the configurator
//! queues one operation: an optional configuration write followed by exactly
//! one read. The telemetry characteristic additionally gets a single
//! subscription request per discovery cycle. The operations are handed back
//! to the session task, which polls them concurrently and feeds each
//! completion back through [`DeviceConfigurator::apply_read`].

use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use tracing::debug;
use uuid::Uuid;

use calypso_types::{
    CharacteristicRole, DeviceInfoRecord, DeviceState, Observation, OperatingMode, frame,
};

use crate::error::Result;
use crate::options::{DeviceOptions, OutputRate};
use crate::transport::{DiscoveredCharacteristic, NotificationStream, Transport};

/// Result of the write/read pair issued for one characteristic.
pub struct CharacteristicOutcome {
    pub characteristic: DiscoveredCharacteristic,
    /// `None` when no write was needed.
    pub write: Option<Result<()>>,
    pub read: Result<Vec<u8>>,
}

/// Completion of a queued configuration operation.
pub enum ConfigOutcome {
    Characteristic(CharacteristicOutcome),
    Subscription {
        uuid: Uuid,
        result: Result<NotificationStream>,
    },
}

impl std::fmt::Debug for ConfigOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigOutcome::Characteristic(outcome) => f
                .debug_struct("Characteristic")
                .field("uuid", &outcome.characteristic.uuid)
                .field("write", &outcome.write)
                .field("read", &outcome.read)
                .finish(),
            ConfigOutcome::Subscription { uuid, result } => f
                .debug_struct("Subscription")
                .field("uuid", uuid)
                .field("ok", &result.is_ok())
                .finish(),
        }
    }
}

/// A queued configuration operation.
pub type ConfigOperation = BoxFuture<'static, ConfigOutcome>;

/// What a successful read produced.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ReadEffects {
    /// Device information to publish.
    pub records: Vec<DeviceInfoRecord>,
    /// Observation decoded from a read of the telemetry characteristic.
    pub observation: Option<Observation>,
    /// The device reported that it is in sleep mode.
    pub sleeping: bool,
}

/// Issues configuration writes and reads, and owns the live device state.
#[derive(Debug, Clone)]
pub struct DeviceConfigurator {
    rate: Option<OutputRate>,
    compass: Option<bool>,
    state: DeviceState,
    subscribed: bool,
}

impl DeviceConfigurator {
    /// Create a configurator for the given options.
    pub fn new(options: &DeviceOptions) -> Self {
        Self {
            rate: options.rate,
            compass: options.compass,
            state: DeviceState::default(),
            subscribed: false,
        }
    }

    /// Live device state as last read back.
    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    /// Whether a telemetry subscription is in place or pending.
    pub fn is_subscribed(&self) -> bool {
        self.subscribed
    }

    /// Bytes to write to `characteristic`, if any.
    pub fn write_for(&self, characteristic: &DiscoveredCharacteristic) -> Option<Vec<u8>> {
        if let Some(rate) = self.rate
            && characteristic.has_role(CharacteristicRole::RateConfig)
        {
            return Some(vec![rate.hz()]);
        }
        if let Some(compass) = self.compass
            && characteristic.has_role(CharacteristicRole::CompassConfig)
        {
            return Some(vec![u8::from(compass)]);
        }
        None
    }

    /// Queue the configuration pass for one discovery cycle.
    pub fn begin(
        &mut self,
        transport: &Arc<dyn Transport>,
        peripheral: &str,
        characteristics: &[DiscoveredCharacteristic],
    ) -> Vec<ConfigOperation> {
        let mut operations = Vec::with_capacity(characteristics.len() + 1);

        for characteristic in characteristics {
            let write = self.write_for(characteristic);
            if let Some(bytes) = &write {
                debug!("Queueing write {:02X?} to {}", bytes, characteristic.uuid);
            }
            operations.push(characteristic_operation(
                Arc::clone(transport),
                peripheral.to_string(),
                characteristic.clone(),
                write,
            ));

            if characteristic.has_role(CharacteristicRole::TelemetryNotify) && !self.subscribed {
                self.subscribed = true;
                operations.push(subscribe_operation(
                    Arc::clone(transport),
                    peripheral.to_string(),
                    characteristic.uuid,
                ));
            }
        }

        operations
    }

    /// Interpret a completed read.
    pub fn apply_read(
        &mut self,
        characteristic: &DiscoveredCharacteristic,
        data: &[u8],
    ) -> Result<ReadEffects> {
        debug!("Read {}: {:02X?}", characteristic.uuid, data);
        let mut effects = ReadEffects::default();

        for &role in characteristic.roles {
            if role == CharacteristicRole::TelemetryNotify {
                effects.observation = Some(self.decode_frame(data)?);
                continue;
            }
            if let Some(record) = self.state.apply_read(role, data)? {
                debug!("{}", record);
                effects.records.push(record);
            }
            if role == CharacteristicRole::OperatingMode {
                effects.sleeping = matches!(
                    data.first().map(|&raw| OperatingMode::try_from(raw)),
                    Some(Ok(OperatingMode::Sleep))
                );
            }
        }

        Ok(effects)
    }

    /// Decode a telemetry frame, gated on the live compass state.
    pub fn decode_frame(&self, data: &[u8]) -> Result<Observation> {
        let observation = frame::decode(data, self.state.compass_enabled)?;
        debug!(?observation, "Decoded telemetry frame");
        Ok(observation)
    }

    /// The subscription request failed; allow a new one next cycle.
    pub fn subscription_failed(&mut self) {
        self.subscribed = false;
    }

    /// Forget the subscription before the link is torn down.
    pub fn reset(&mut self) {
        self.subscribed = false;
    }
}

fn characteristic_operation(
    transport: Arc<dyn Transport>,
    peripheral: String,
    characteristic: DiscoveredCharacteristic,
    write: Option<Vec<u8>>,
) -> ConfigOperation {
    async move {
        let write = match write {
            Some(bytes) => Some(transport.write(&peripheral, characteristic.uuid, &bytes).await),
            None => None,
        };
        let read = transport.read(&peripheral, characteristic.uuid).await;
        ConfigOutcome::Characteristic(CharacteristicOutcome {
            characteristic,
            write,
            read,
        })
    }
    .boxed()
}

fn subscribe_operation(
    transport: Arc<dyn Transport>,
    peripheral: String,
    uuid: Uuid,
) -> ConfigOperation {
    async move {
        let result = transport.subscribe(&peripheral, uuid).await;
        ConfigOutcome::Subscription { uuid, result }
    }
    .boxed()
}
