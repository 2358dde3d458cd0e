//! Error handling for vnasaver-rs
//!
//! This module defines the error types for each component boundary and a
//! crate-wide Result alias.
//!
//! - [`ConnectError`] - Opening the transport or reaching the instrument
//! - [`SweepError`] - Failures while the worker runs a sweep
//! - [`ExportError`] - Writing a Touchstone file
//! - [`VnaError`] - Crate-level error wrapping all of the above

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for vnasaver-rs operations
#[derive(Error, Debug)]
pub enum VnaError {
    /// Errors related to opening or re-establishing a device session
    #[error("Connection error: {0}")]
    Connect(#[from] ConnectError),

    /// Errors raised while sweeping
    #[error("Sweep error: {0}")]
    Sweep(#[from] SweepError),

    /// Errors related to file export
    #[error("Export error: {0}")]
    Export(#[from] ExportError),

    /// Errors related to configuration loading/saving/validation
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed Touchstone input
    #[error("Touchstone error: {0}")]
    Touchstone(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<VnaError>,
    },
}

impl VnaError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        VnaError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

/// Errors from the device session manager
#[derive(Error, Debug)]
pub enum ConnectError {
    /// No candidate serial port was found
    #[error("no VNA device found")]
    NoDevice,

    /// The transport could not be opened
    #[error("failed to open {identifier}: {reason}")]
    OpenFailed { identifier: String, reason: String },

    /// The transport opened but reports itself closed
    #[error("{identifier} reports closed right after opening")]
    NotOpen { identifier: String },

    /// The instrument did not answer the frequency query
    #[error("instrument on {identifier} is unresponsive: {reason}")]
    ProtocolFailure { identifier: String, reason: String },
}

/// Errors raised while the worker runs a sweep
#[derive(Error, Debug)]
pub enum SweepError {
    /// No instrument handle is available, or it reports disconnected
    #[error("instrument not connected")]
    NotConnected,

    /// The sweep was stopped part-way through
    #[error("sweep cancelled")]
    Cancelled,

    /// The instrument did not finish a command in time
    #[error("timeout waiting for '{command}'")]
    Timeout { command: String },

    /// Transport IO failure
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    /// Unparseable instrument response
    #[error("malformed response: {0}")]
    Protocol(String),

    /// Frequency and value lists disagree in length
    #[error("instrument returned {values} values for {frequencies} frequencies")]
    LengthMismatch { frequencies: usize, values: usize },

    /// A session lock was poisoned by a panicking thread
    #[error("session lock poisoned")]
    Poisoned,
}

/// Errors from writing an export file
#[derive(Error, Debug)]
pub enum ExportError {
    /// No S11 data to write
    #[error("nothing to export: S11 buffer is empty")]
    Empty,

    /// The file could not be written
    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result type alias for vnasaver-rs operations
pub type Result<T> = std::result::Result<T, VnaError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E: Into<VnaError>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.into().with_context(f()))
    }
}
