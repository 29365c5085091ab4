//! Numeric classification of published values.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How consumers should treat a sensor's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateClass {
    /// A continuously sampled number
    Measurement,
}

/// Parse a value as a number, accepting numeric strings.
pub fn numeric_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

/// Tag a value as a measurement when it has a unit and parses as a number.
pub fn classify(value: &Value, unit: Option<&str>) -> Option<StateClass> {
    match unit {
        Some(unit) if !unit.trim().is_empty() => {
            numeric_value(value).map(|_| StateClass::Measurement)
        }
        _ => None,
    }
}
