//! Touchstone export
//!
//! [`ExportScheduler`] writes one file per completed sweep, named after the
//! local time of the update: `YYYYMMDD_HHMMSS.s2p` (or `.s1p`). A failed
//! write is logged and that update is dropped; the session continues.

pub mod touchstone;

pub use touchstone::Touchstone;

use crate::error::ExportError;
use crate::types::Datapoint;
use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Extension of 2-port files
pub const TWO_PORT_EXTENSION: &str = "s2p";

/// Extension of 1-port files
pub const ONE_PORT_EXTENSION: &str = "s1p";

/// Timestamp format used for file names
pub const FILE_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Number of ports written per file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PortCount {
    /// S11 only
    One,
    /// S11 and S21, with S12/S22 synthesized
    #[default]
    Two,
}

impl PortCount {
    /// File extension for this port count
    pub fn extension(&self) -> &'static str {
        match self {
            PortCount::One => ONE_PORT_EXTENSION,
            PortCount::Two => TWO_PORT_EXTENSION,
        }
    }
}

impl std::fmt::Display for PortCount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PortCount::One => write!(f, "1-port"),
            PortCount::Two => write!(f, "2-port"),
        }
    }
}

/// Writes a Touchstone file for every sweep update
#[derive(Debug, Clone)]
pub struct ExportScheduler {
    output_dir: PathBuf,
    ports: PortCount,
}

impl ExportScheduler {
    /// Create a scheduler writing into `output_dir`
    pub fn new(output_dir: impl Into<PathBuf>, ports: PortCount) -> Self {
        Self {
            output_dir: output_dir.into(),
            ports,
        }
    }

    /// Directory files are written into
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Configured port count; 2-port falls back to 1-port without S21
    pub fn ports(&self) -> PortCount {
        self.ports
    }

    /// File name for an update at `at`, using the configured port count
    pub fn file_name_for(&self, at: NaiveDateTime) -> String {
        Self::file_name(at, self.ports)
    }

    fn file_name(at: NaiveDateTime, ports: PortCount) -> String {
        format!("{}.{}", at.format(FILE_TIMESTAMP_FORMAT), ports.extension())
    }

    /// Export using the local clock
    ///
    /// Returns the written path, or `None` if the export failed (already
    /// logged).
    pub fn export_on_update(&self, s11: &[Datapoint], s21: &[Datapoint]) -> Option<PathBuf> {
        match self.export_on_update_at(s11, s21, Local::now().naive_local()) {
            Ok(path) => Some(path),
            Err(e) => {
                tracing::error!("Export failed: {}", e);
                None
            }
        }
    }

    /// Export as if the update happened at `at`
    pub fn export_on_update_at(
        &self,
        s11: &[Datapoint],
        s21: &[Datapoint],
        at: NaiveDateTime,
    ) -> Result<PathBuf, ExportError> {
        if s11.is_empty() {
            return Err(ExportError::Empty);
        }

        let ports = match self.ports {
            PortCount::Two if s21.is_empty() => {
                tracing::warn!("No S21 data, writing a 1-port file instead");
                PortCount::One
            }
            ports => ports,
        };
        if ports == PortCount::Two && s21.len() != s11.len() {
            tracing::warn!(
                "S11 has {} points but S21 has {}, extra points dropped",
                s11.len(),
                s21.len()
            );
        }

        let touchstone = match ports {
            PortCount::One => Touchstone::one_port(s11.to_vec()),
            PortCount::Two => Touchstone::two_port(s11.to_vec(), s21.to_vec()),
        };

        let path = self.output_dir.join(Self::file_name(at, ports));
        let write_error = |source| ExportError::Write {
            path: path.clone(),
            source,
        };
        std::fs::create_dir_all(&self.output_dir).map_err(write_error)?;
        touchstone.save(&path).map_err(write_error)?;

        tracing::debug!("Wrote {} ({} points)", path.display(), s11.len());
        Ok(path)
    }
}
