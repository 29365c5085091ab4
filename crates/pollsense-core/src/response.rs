//! Raw fetch results and the per-target poll health signal.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::config::{FetchConfig, ResponseMode};

/// The result of one successful request.
///
/// Built once per tick, shared read-only by every rule of the target and
/// dropped when the tick ends.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    pub status: u16,
    /// Header names are lowercase
    pub headers: BTreeMap<String, String>,
    pub text: String,
    /// Decoded body; only set in structured mode when the body is valid JSON
    pub json: Option<Value>,
}

impl RawResponse {
    pub fn new(status: u16, text: impl Into<String>) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            text: text.into(),
            json: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    /// Decode the body as JSON when `mode` is structured.
    ///
    /// A body that does not decode leaves `json` unset.
    pub fn decoded_for(mut self, mode: ResponseMode) -> Self {
        if mode == ResponseMode::Structured {
            self.json = decode_json(&self.text);
        }
        self
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("content-type").map(String::as_str)
    }

    /// Declared content length, falling back to the body size.
    pub fn content_length(&self) -> u64 {
        self.headers
            .get("content-length")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(self.text.len() as u64)
    }
}

/// Best-effort JSON decode of a response body.
pub fn decode_json(text: &str) -> Option<Value> {
    match serde_json::from_str(text) {
        Ok(value) => Some(value),
        Err(e) => {
            debug!("response body is not valid JSON: {}", e);
            None
        }
    }
}

/// Coarse category of an HTTP status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCategory {
    Success,
    Redirect,
    ClientError,
    ServerError,
    Unknown,
}

impl StatusCategory {
    pub fn of(status: u16) -> Self {
        match status {
            200..=299 => Self::Success,
            300..=399 => Self::Redirect,
            400..=499 => Self::ClientError,
            500..=599 => Self::ServerError,
            _ => Self::Unknown,
        }
    }
}

/// Up/down signal of one target, updated every tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PollHealth {
    /// Status code of the last response received
    pub last_status: Option<u16>,
    /// Whether the last tick got a response at all; `None` before the first tick
    pub last_success: Option<bool>,
    pub last_error: Option<String>,
    pub response_headers: BTreeMap<String, String>,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub last_checked: Option<DateTime<Utc>>,
}

impl PollHealth {
    pub fn record_response(&mut self, response: &RawResponse, at: DateTime<Utc>) {
        self.last_status = Some(response.status);
        self.last_success = Some(true);
        self.last_error = None;
        self.response_headers = response.headers.clone();
        self.content_type = response.content_type().map(String::from);
        self.content_length = Some(response.content_length());
        self.last_checked = Some(at);
    }

    /// Record a failed tick. The last status and headers are kept.
    pub fn record_failure(&mut self, error: impl Into<String>, at: DateTime<Utc>) {
        self.last_success = Some(false);
        self.last_error = Some(error.into());
        self.last_checked = Some(at);
    }

    /// `Some(true)` for a 2xx status, `Some(false)` for any other status or a
    /// failed tick, `None` before the first tick.
    pub fn is_up(&self) -> Option<bool> {
        match (self.last_success, self.last_status) {
            (Some(false), _) => Some(false),
            (_, Some(status)) => Some(StatusCategory::of(status) == StatusCategory::Success),
            _ => None,
        }
    }

    pub fn category(&self) -> Option<StatusCategory> {
        self.last_status.map(StatusCategory::of)
    }

    /// Attribute map describing the target and its last response.
    pub fn attributes(&self, config: &FetchConfig) -> Map<String, Value> {
        let mut attrs = Map::new();
        attrs.insert(
            "http_status".to_string(),
            self.last_status.map(Value::from).unwrap_or(Value::Null),
        );
        attrs.insert(
            "response_type".to_string(),
            Value::String(config.mode.to_string()),
        );
        attrs.insert("url".to_string(), Value::String(config.url.clone()));
        attrs.insert(
            "method".to_string(),
            Value::String(config.method.to_string()),
        );
        attrs.insert("timeout".to_string(), Value::from(config.timeout.as_secs()));
        attrs.insert("verify_ssl".to_string(), Value::Bool(config.verify_ssl));
        attrs.insert(
            "scan_interval".to_string(),
            Value::from(config.scan_interval.as_secs()),
        );

        if self.last_status.is_some() {
            let headers = self
                .response_headers
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect();
            attrs.insert("response_headers".to_string(), Value::Object(headers));
        }
        if let Some(content_type) = &self.content_type {
            attrs.insert(
                "content_type".to_string(),
                Value::String(content_type.clone()),
            );
        }
        if let Some(length) = self.content_length {
            attrs.insert("content_length".to_string(), Value::from(length));
        }
        attrs
    }
}
