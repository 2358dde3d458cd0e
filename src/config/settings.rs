//! Configuration sections
//!
//! Each section maps to a table in the configuration file. Every field has
//! a serde default so a partial file (or an empty one) loads cleanly.
//!
//! # Main Types
//!
//! - [`TransportSettings`] - Serial port selection and timing
//! - [`SessionSettings`] - Poll interval, watchdog, error handling
//! - [`ExportSettings`] - Output directory and port count
//! - [`CalibrationSettings`] - Fixed corrections applied on save

use crate::backend::controller::DEFAULT_POLL_INTERVAL;
use crate::backend::session::DEFAULT_SETTLE_DELAY;
use crate::backend::transport::{DEFAULT_BAUD_RATE, DEFAULT_READ_TIMEOUT};
use crate::backend::worker::{DEFAULT_ERROR_BACKOFF, DEFAULT_MAX_CONSECUTIVE_ERRORS};
use crate::export::PortCount;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Serial link settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSettings {
    /// Port name; discovered by USB ID when absent
    pub port: Option<String>,

    /// Baud rate
    pub baud_rate: u32,

    /// Read timeout in milliseconds
    pub read_timeout_ms: u64,

    /// Pause after opening the port, in milliseconds
    pub settle_delay_ms: u64,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout_ms: DEFAULT_READ_TIMEOUT.as_millis() as u64,
            settle_delay_ms: DEFAULT_SETTLE_DELAY.as_millis() as u64,
        }
    }
}

impl TransportSettings {
    /// Read timeout as a duration
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Settle delay as a duration
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

/// Controller and worker timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Interval between status checks in milliseconds
    pub poll_interval_ms: u64,

    /// Warn if no sweep completes within this many milliseconds
    pub watchdog_ms: Option<u64>,

    /// Pause after a failed sweep in milliseconds
    pub error_backoff_ms: u64,

    /// Consecutive failed sweeps before giving up
    pub max_consecutive_errors: u32,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            watchdog_ms: None,
            error_backoff_ms: DEFAULT_ERROR_BACKOFF.as_millis() as u64,
            max_consecutive_errors: DEFAULT_MAX_CONSECUTIVE_ERRORS,
        }
    }
}

impl SessionSettings {
    /// Poll interval as a duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Watchdog limit as a duration
    pub fn watchdog(&self) -> Option<Duration> {
        self.watchdog_ms.map(Duration::from_millis)
    }

    /// Error backoff as a duration
    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }
}

/// Export settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportSettings {
    /// Directory Touchstone files are written to
    pub output_dir: PathBuf,

    /// Whether files are written as 1-port or 2-port
    pub ports: PortCount,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            ports: PortCount::Two,
        }
    }
}

/// Fixed corrections
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationSettings {
    /// Attenuator in the S21 path, in dB; added back on save
    pub s21_attenuation_db: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_defaults() {
        let settings = TransportSettings::default();
        assert_eq!(settings.port, None);
        assert_eq!(settings.baud_rate, 115_200);
        assert_eq!(settings.read_timeout(), Duration::from_millis(50));
        assert_eq!(settings.settle_delay(), Duration::from_millis(100));
    }

    #[test]
    fn test_session_defaults() {
        let settings = SessionSettings::default();
        assert_eq!(settings.poll_interval(), Duration::from_millis(50));
        assert_eq!(settings.watchdog(), None);
        assert_eq!(settings.max_consecutive_errors, 5);
    }

    #[test]
    fn test_partial_section_uses_defaults() {
        let settings: SessionSettings = serde_json::from_str(r#"{"watchdog_ms": 2000}"#).unwrap();
        assert_eq!(settings.watchdog(), Some(Duration::from_secs(2)));
        assert_eq!(settings.poll_interval_ms, 50);
    }
}
