//! Last-known-good value retention.
//!
//! Each sensor carries a [`ValueRetention`] across ticks. Valid rendered values
//! overwrite the cache; on a failed fetch or an invalid render the cached
//! value is replayed if the sensor asked for it.

use serde_json::{Map, Value};

/// Textual forms that mark a value as unusable.
const INVALID_SENTINELS: [&str; 4] = ["false", "none", "unknown", "unavailable"];

/// Textual form of a value, as compared against the invalid sentinels.
pub fn state_text(value: &Value) -> String {
    match value {
        Value::Null => "none".to_string(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Whether a rendered value must be treated as absent.
///
/// `"true"`, `0` and `""` are all valid.
pub fn is_invalid(value: &Value) -> bool {
    if value.is_null() {
        return true;
    }
    let text = state_text(value).to_lowercase();
    INVALID_SENTINELS.contains(&text.as_str())
}

/// What the retention policy decided to publish.
#[derive(Debug, Clone, PartialEq)]
pub struct Retained {
    pub value: Value,
    /// `Some` only when a cached attribute map is replayed
    pub attributes: Option<Map<String, Value>>,
    pub replayed: bool,
}

/// Per-sensor cache of the last valid value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValueRetention {
    keep_value: bool,
    keep_attributes: bool,
    last_good: Option<Value>,
    last_good_attributes: Option<Map<String, Value>>,
}

impl ValueRetention {
    pub fn new(keep_value: bool, keep_attributes: bool) -> Self {
        Self {
            keep_value,
            keep_attributes,
            ..Default::default()
        }
    }

    pub fn last_good(&self) -> Option<&Value> {
        self.last_good.as_ref()
    }

    /// Apply the policy to a rendered value and its attributes.
    pub fn on_rendered(&mut self, value: Value, attributes: &Map<String, Value>) -> Retained {
        if is_invalid(&value) {
            return self.on_missing(value);
        }
        self.last_good = Some(value.clone());
        self.last_good_attributes = Some(attributes.clone());
        Retained {
            value,
            attributes: None,
            replayed: false,
        }
    }

    /// Apply the policy when the fetch failed.
    pub fn on_failure(&mut self) -> Retained {
        self.on_missing(Value::Null)
    }

    fn on_missing(&self, value: Value) -> Retained {
        match (&self.last_good, self.keep_value) {
            (Some(last), true) => Retained {
                value: last.clone(),
                attributes: if self.keep_attributes {
                    self.last_good_attributes.clone()
                } else {
                    None
                },
                replayed: true,
            },
            _ => Retained {
                value,
                attributes: None,
                replayed: false,
            },
        }
    }
}
