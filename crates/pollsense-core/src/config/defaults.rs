//! Default values and environment variable helpers.

use std::time::Duration;

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 15;
/// Largest accepted request timeout in seconds.
pub const MAX_TIMEOUT_SECS: u64 = 300;
/// TLS certificates are verified unless a target opts out.
pub const DEFAULT_VERIFY_SSL: bool = true;
/// Default poll interval in seconds.
pub const DEFAULT_SCAN_INTERVAL_SECS: u64 = 60;
/// Poll intervals below this are raised to it.
pub const MIN_SCAN_INTERVAL_SECS: u64 = 10;
/// Capture group used by text rules that do not name one.
pub const DEFAULT_TEXT_GROUP: usize = 1;

pub fn default_timeout() -> Duration {
    Duration::from_secs(DEFAULT_TIMEOUT_SECS)
}

pub fn default_scan_interval() -> Duration {
    Duration::from_secs(DEFAULT_SCAN_INTERVAL_SECS)
}

pub fn min_scan_interval() -> Duration {
    Duration::from_secs(MIN_SCAN_INTERVAL_SECS)
}

/// Environment variable names.
pub mod env_vars {
    /// Emit JSON log lines instead of the compact human format.
    pub const LOG_JSON: &str = "POLLSENSE_LOG_JSON";

    /// Whether JSON logging was requested, defaulting to false.
    pub fn log_json() -> bool {
        std::env::var(LOG_JSON)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_durations() {
        assert_eq!(default_timeout(), Duration::from_secs(15));
        assert_eq!(default_scan_interval(), Duration::from_secs(60));
        assert!(min_scan_interval() < default_scan_interval());
    }
}
