//! Mapping observations to the host's delta format.
//!
//! Each decoded frame becomes one [`Delta`]:
//!
//! ```json
//! {
//!   "context": "self",
//!   "updates": [{
//!     "source": {"label": "Calypso Ultrasonic", "type": "Ultrasonic"},
//!     "timestamp": "2024-05-01T12:00:00Z",
//!     "values": [{"path": "environment.wind.speedApparent", "value": 10.0}, ...]
//!   }]
//! }
//! ```

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use calypso_types::Observation;

/// Label of the update source.
pub const SOURCE_LABEL: &str = "Calypso Ultrasonic";
/// Type of the update source.
pub const SOURCE_TYPE: &str = "Ultrasonic";
/// Name reported for the anemometer's battery.
pub const BATTERY_NAME: &str = "ULTRASONIC";
/// Location reported for the anemometer's battery.
pub const BATTERY_LOCATION: &str = "Mast";

pub mod paths {
    pub const OUTSIDE_TEMPERATURE: &str = "environment.outside.temperature";
    pub const WIND_ANGLE_APPARENT: &str = "environment.wind.angleApparent";
    pub const WIND_SPEED_APPARENT: &str = "environment.wind.speedApparent";
    pub const BATTERY_NAME: &str = "electrical.batteries.99.name";
    pub const BATTERY_LOCATION: &str = "electrical.batteries.99.location";
    pub const BATTERY_STATE_OF_CHARGE: &str = "electrical.batteries.99.capacity.stateOfCharge";
    pub const ATTITUDE_ROLL: &str = "navigation.attitude.roll";
    pub const ATTITUDE_PITCH: &str = "navigation.attitude.pitch";
    pub const ATTITUDE_YAW: &str = "navigation.attitude.yaw";
    pub const HEADING_MAGNETIC: &str = "navigation.headingMagnetic";
}

/// A value in a delta: numbers for measurements, text for labels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DeltaValue {
    Number(f64),
    Text(String),
}

impl DeltaValue {
    /// The numeric value, if this is a number.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            DeltaValue::Number(n) => Some(*n),
            DeltaValue::Text(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathValue {
    pub path: String,
    pub value: DeltaValue,
}

impl PathValue {
    fn number(path: &str, value: f64) -> Self {
        Self {
            path: path.to_string(),
            value: DeltaValue::Number(value),
        }
    }

    fn text(path: &str, value: &str) -> Self {
        Self {
            path: path.to_string(),
            value: DeltaValue::Text(value.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub label: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Update {
    pub source: Source,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub values: Vec<PathValue>,
}

/// A delta envelope carrying one update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    pub context: String,
    pub updates: Vec<Update>,
}

impl Delta {
    /// Look up a value by path across all updates.
    pub fn value(&self, path: &str) -> Option<&DeltaValue> {
        self.updates
            .iter()
            .flat_map(|u| u.values.iter())
            .find(|v| v.path == path)
            .map(|v| &v.value)
    }
}

/// Turns observations into deltas.
#[derive(Debug, Clone, Default)]
pub struct ObservationPublisher;

impl ObservationPublisher {
    pub fn new() -> Self {
        Self
    }

    /// Build the path/value list for an observation.
    ///
    /// Attitude paths are only present when the observation carries attitude.
    pub fn values(&self, observation: &Observation) -> Vec<PathValue> {
        let mut values = vec![
            PathValue::number(paths::OUTSIDE_TEMPERATURE, observation.outside_temperature),
            PathValue::number(paths::WIND_ANGLE_APPARENT, observation.wind_angle_apparent),
            PathValue::number(paths::WIND_SPEED_APPARENT, observation.wind_speed_apparent),
            PathValue::text(paths::BATTERY_NAME, BATTERY_NAME),
            PathValue::text(paths::BATTERY_LOCATION, BATTERY_LOCATION),
            PathValue::number(
                paths::BATTERY_STATE_OF_CHARGE,
                observation.battery_state_of_charge,
            ),
        ];

        if let Some(attitude) = observation.attitude {
            values.push(PathValue::number(paths::ATTITUDE_ROLL, attitude.roll));
            values.push(PathValue::number(paths::ATTITUDE_PITCH, attitude.pitch));
            values.push(PathValue::number(
                paths::ATTITUDE_YAW,
                attitude.heading_magnetic,
            ));
            values.push(PathValue::number(
                paths::HEADING_MAGNETIC,
                attitude.heading_magnetic,
            ));
        }

        values
    }

    /// Wrap an observation in a delta envelope stamped with its timestamp.
    pub fn to_delta(&self, observation: &Observation) -> Delta {
        Delta {
            context: "self".to_string(),
            updates: vec![Update {
                source: Source {
                    label: SOURCE_LABEL.to_string(),
                    kind: SOURCE_TYPE.to_string(),
                },
                timestamp: observation.timestamp,
                values: self.values(observation),
            }],
        }
    }
}
