//! Error types for the pollsense core crate.

use thiserror::Error;

/// Result type for pollsense operations.
pub type Result<T> = std::result::Result<T, PollError>;

/// Errors surfaced to callers of the core.
///
/// Only configuration and lifecycle problems are reported this way. Failures
/// inside a fetch tick (transport, decode, locator, render) degrade to a
/// null/replayed value plus a log entry and never reach the caller.
#[derive(Debug, Error)]
pub enum PollError {
    /// Invalid or inconsistent configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// No target registered under this name
    #[error("Target not found: {0}")]
    TargetNotFound(String),

    /// A target with this name is already being polled
    #[error("Target already registered: {0}")]
    DuplicateTarget(String),

    /// Configuration file could not be read
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The poll service has been shut down
    #[error("Poll service is stopped")]
    Stopped,

    /// Other error
    #[error("Poll error: {0}")]
    Other(#[from] anyhow::Error),
}

impl From<toml::de::Error> for PollError {
    fn from(e: toml::de::Error) -> Self {
        PollError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = PollError::Configuration("scan_interval must be positive".to_string());
        assert_eq!(
            error.to_string(),
            "Configuration error: scan_interval must be positive"
        );

        let error = PollError::TargetNotFound("weather".to_string());
        assert!(error.to_string().contains("weather"));

        assert!(PollError::Stopped.to_string().contains("stopped"));
    }

    #[test]
    fn test_toml_error_conversion() {
        let parse: std::result::Result<toml::Value, _> = toml::from_str("name = ");
        let error: PollError = parse.unwrap_err().into();
        assert!(matches!(error, PollError::Serialization(_)));
    }
}
