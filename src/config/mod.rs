//! Configuration module for vnasaver-rs
//!
//! Configuration comes from an optional file and the command line. The
//! file is TOML or JSON, picked by extension; command-line flags override
//! whatever the file says.
//!
//! # Default Location
//!
//! Without `--config`, the file is looked up in the platform data
//! directory:
//! - **Linux**: `~/.local/share/dev.vnasaver-rs/config.toml`
//! - **macOS**: `~/Library/Application Support/dev.vnasaver-rs/config.toml`
//! - **Windows**: `%APPDATA%\dev.vnasaver-rs\config.toml`
//!
//! A missing default file is not an error; an explicit path that does not
//! exist is.
//!
//! # Example
//!
//! ```toml
//! [sweep]
//! start = 1000000
//! stop = 30000000
//! mode = "continuous"
//!
//! [transport]
//! port = "/dev/ttyACM0"
//!
//! [export]
//! output_dir = "captures"
//! ports = "two"
//! ```

pub mod settings;

pub use settings::*;

use crate::error::{Result, VnaError};
use crate::types::SweepConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application identifier for data directories
pub const APP_ID: &str = "dev.vnasaver-rs";

/// Default configuration filename
pub const CONFIG_FILE: &str = "config.toml";

/// Get the application data directory path
pub fn app_data_dir() -> Option<PathBuf> {
    dirs_next::data_dir().map(|p| p.join(APP_ID))
}

/// Get the path of the default configuration file
pub fn default_config_path() -> Option<PathBuf> {
    app_data_dir().map(|p| p.join(CONFIG_FILE))
}

/// On-disk file format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
}

impl ConfigFormat {
    /// Pick a format from a file extension; anything but `.json` is TOML
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => ConfigFormat::Json,
            _ => ConfigFormat::Toml,
        }
    }
}

/// Complete application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Sweep range and mode
    #[serde(default)]
    pub sweep: SweepConfig,

    /// Serial link
    #[serde(default)]
    pub transport: TransportSettings,

    /// Controller timing
    #[serde(default)]
    pub session: SessionSettings,

    /// Touchstone export
    #[serde(default)]
    pub export: ExportSettings,

    /// Fixed corrections
    #[serde(default)]
    pub calibration: CalibrationSettings,
}

impl AppConfig {
    /// Create a new default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            VnaError::Config(format!("Failed to read config {}: {}", path.display(), e))
        })?;
        Self::parse(&content, ConfigFormat::from_path(path))
            .map_err(|e| e.with_context(format!("Failed to parse config {}", path.display())))
    }

    /// Load the default file if present, otherwise defaults
    pub fn load_default() -> Result<Self> {
        match default_config_path() {
            Some(path) if path.exists() => Self::load(path),
            _ => Ok(Self::default()),
        }
    }

    /// Parse configuration text
    pub fn parse(content: &str, format: ConfigFormat) -> Result<Self> {
        match format {
            ConfigFormat::Toml => {
                toml::from_str(content).map_err(|e| VnaError::Serialization(e.to_string()))
            }
            ConfigFormat::Json => {
                serde_json::from_str(content).map_err(|e| VnaError::Serialization(e.to_string()))
            }
        }
    }

    /// Save to a file, format chosen by extension
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    VnaError::Config(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        let content = match ConfigFormat::from_path(path) {
            ConfigFormat::Toml => toml::to_string_pretty(self)
                .map_err(|e| VnaError::Serialization(e.to_string()))?,
            ConfigFormat::Json => serde_json::to_string_pretty(self)
                .map_err(|e| VnaError::Serialization(e.to_string()))?,
        };

        std::fs::write(path, content)
            .map_err(|e| VnaError::Config(format!("Failed to write config: {}", e)))
    }

    /// Check the configuration for values the controller cannot run with
    pub fn validate(&self) -> Result<()> {
        self.sweep.validate()?;

        if self.session.poll_interval_ms == 0 {
            return Err(VnaError::Config(
                "poll interval must be greater than zero".to_string(),
            ));
        }
        if self.session.max_consecutive_errors == 0 {
            return Err(VnaError::Config(
                "max_consecutive_errors must be at least 1".to_string(),
            ));
        }
        if self.transport.baud_rate == 0 {
            return Err(VnaError::Config("baud rate must be greater than zero".to_string()));
        }
        if !self.calibration.s21_attenuation_db.is_finite() {
            return Err(VnaError::Config("S21 attenuation must be finite".to_string()));
        }
        Ok(())
    }
}

// ==================== Tests ====================
