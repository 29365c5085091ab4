//! Published sensor state and poll events.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::classify::StateClass;
use crate::response::PollHealth;

/// The published state of one sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorState {
    /// `Null` when no value is available
    pub value: Value,
    pub attributes: Map<String, Value>,
    pub state_class: Option<StateClass>,
    pub unit: Option<String>,
    /// Time of the tick that produced this state
    pub last_updated: DateTime<Utc>,
    /// The value was replayed from an earlier tick
    #[serde(default)]
    pub replayed: bool,
}

impl SensorState {
    /// State of a sensor that has not produced anything yet.
    pub fn unknown(unit: Option<String>, at: DateTime<Utc>) -> Self {
        Self {
            value: Value::Null,
            attributes: Map::new(),
            state_class: None,
            unit,
            last_updated: at,
            replayed: false,
        }
    }

    pub fn is_available(&self) -> bool {
        !self.value.is_null()
    }
}

/// Everything known about one target after a tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetSnapshot {
    pub target: String,
    /// Tick sequence number; later ticks have larger numbers
    pub sequence: u64,
    pub sensors: BTreeMap<String, SensorState>,
    pub health: PollHealth,
}

impl TargetSnapshot {
    pub fn empty(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            sequence: 0,
            sensors: BTreeMap::new(),
            health: PollHealth::default(),
        }
    }

    pub fn sensor(&self, name: &str) -> Option<&SensorState> {
        self.sensors.get(name)
    }

    /// Shortcut for a sensor's value, `Null` when unknown.
    pub fn value(&self, name: &str) -> &Value {
        self.sensors
            .get(name)
            .map(|s| &s.value)
            .unwrap_or(&Value::Null)
    }
}

/// Events published by the poll service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PollEvent {
    /// A tick was committed
    Updated {
        snapshot: TargetSnapshot,
        timestamp: i64,
    },

    /// A tick's request failed; the snapshot still reflects retention
    FetchFailed {
        target: String,
        error: String,
        timestamp: i64,
    },

    /// A target started polling
    TargetAdded { target: String, timestamp: i64 },

    /// A target stopped polling
    TargetRemoved { target: String, timestamp: i64 },
}

impl PollEvent {
    /// Name of the target this event concerns.
    pub fn target(&self) -> &str {
        match self {
            Self::Updated { snapshot, .. } => &snapshot.target,
            Self::FetchFailed { target, .. }
            | Self::TargetAdded { target, .. }
            | Self::TargetRemoved { target, .. } => target,
        }
    }

    pub fn timestamp(&self) -> i64 {
        match self {
            Self::Updated { timestamp, .. }
            | Self::FetchFailed { timestamp, .. }
            | Self::TargetAdded { timestamp, .. }
            | Self::TargetRemoved { timestamp, .. } => *timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_snapshot_value_lookup() {
        let now = Utc::now();
        let mut snapshot = TargetSnapshot::empty("weather");
        let mut state = SensorState::unknown(Some("°C".into()), now);
        assert!(!state.is_available());
        state.value = json!(21.5);
        snapshot.sensors.insert("temperature".into(), state);

        assert_eq!(snapshot.value("temperature"), &json!(21.5));
        assert_eq!(snapshot.value("missing"), &Value::Null);
    }

    #[test]
    fn test_event_serialization() {
        let event = PollEvent::TargetAdded {
            target: "weather".into(),
            timestamp: 1_700_000_000,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "target_added");
        assert_eq!(event.target(), "weather");
        assert_eq!(event.timestamp(), 1_700_000_000);
    }
}
