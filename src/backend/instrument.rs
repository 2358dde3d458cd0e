//! Instrument trait and the NanoVNA shell driver
//!
//! An [`Instrument`] is the logical handle over an open transport. The
//! session manager obtains one through an [`InstrumentDriver`] after the
//! transport is open, and the sweep worker uses it to run sweeps.
//!
//! # NanoVNA Shell
//!
//! The NanoVNA exposes a line-oriented shell. Every command is terminated
//! with `\r`; the device echoes the command, prints its output and then the
//! prompt `ch> `. The commands used here are:
//!
//! - `frequencies` - one frequency in Hz per line
//! - `sweep <start> <stop> <points>` - configure the sweep range
//! - `data 0` / `data 1` - S11 / S21 as `re im` per line

use crate::backend::transport::SharedTransport;
use crate::error::{ConnectError, SweepError};
use crate::types::SParameter;
use num_complex::Complex64;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shell prompt terminating every NanoVNA response
const PROMPT: &[u8] = b"ch> ";

/// Default time allowed for a single shell command
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Logical handle to a VNA
pub trait Instrument: Send + Sync {
    /// Display name
    fn name(&self) -> &str;

    /// Check if the underlying link is open
    fn connected(&self) -> bool;

    /// Frequencies of the current sweep, in Hz
    fn read_frequencies(&self) -> Result<Vec<u64>, SweepError>;

    /// First and last frequency of the current sweep
    ///
    /// Returns `None` if the instrument does not answer or reports no points.
    fn frequency_span(&self) -> Option<(u64, u64)> {
        match self.read_frequencies() {
            Ok(freqs) => Some((*freqs.first()?, *freqs.last()?)),
            Err(e) => {
                tracing::debug!("Frequency query on {} failed: {}", self.name(), e);
                None
            }
        }
    }

    /// Configure the sweep range
    fn set_sweep(&self, start: u64, stop: u64, points: usize) -> Result<(), SweepError>;

    /// Read the measured values of one parameter for the current sweep
    fn read_values(&self, parameter: SParameter) -> Result<Vec<Complex64>, SweepError>;
}

/// Shared instrument handle
pub type InstrumentHandle = Arc<dyn Instrument>;

/// Builds an instrument handle on top of an open transport
pub trait InstrumentDriver: Send + Sync {
    /// Attach to the instrument behind `transport`
    fn attach(&self, transport: SharedTransport) -> Result<InstrumentHandle, ConnectError>;
}

/// NanoVNA shell driver
pub struct NanoVna {
    name: String,
    transport: SharedTransport,
    command_timeout: Duration,
}

impl NanoVna {
    /// Create a driver over an open transport
    pub fn new(transport: SharedTransport, command_timeout: Duration) -> Self {
        let name = transport
            .lock()
            .map(|t| format!("NanoVNA ({})", t.identifier()))
            .unwrap_or_else(|_| "NanoVNA".to_string());
        Self {
            name,
            transport,
            command_timeout,
        }
    }

    /// Execute a shell command and return its output lines (echo stripped)
    fn exec(&self, command: &str) -> Result<Vec<String>, SweepError> {
        let mut transport = self.transport.lock().map_err(|_| SweepError::Poisoned)?;

        tracing::trace!("Sending command to {}: '{}'", self.name, command);
        transport.write_all(format!("{}\r", command).as_bytes())?;

        let mut response = Vec::new();
        let mut buffer = [0u8; 1024];
        let start = Instant::now();

        while !response.ends_with(PROMPT) {
            if start.elapsed() > self.command_timeout {
                return Err(SweepError::Timeout {
                    command: command.to_string(),
                });
            }
            match transport.read(&mut buffer) {
                Ok(0) => std::thread::sleep(Duration::from_millis(1)),
                Ok(n) => response.extend_from_slice(&buffer[..n]),
                Err(e) if e.kind() == io::ErrorKind::TimedOut => {}
                Err(e) => return Err(e.into()),
            }
        }
        drop(transport);

        let body = &response[..response.len() - PROMPT.len()];
        let lines = parse_lines(&String::from_utf8_lossy(body), command);
        tracing::trace!("Received {} lines from {}", lines.len(), self.name);
        Ok(lines)
    }
}

/// Split a shell response into trimmed lines, dropping the command echo
fn parse_lines(text: &str, command: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && *line != command)
        .map(str::to_string)
        .collect()
}

/// Parse one `re im` line
fn parse_complex(line: &str) -> Result<Complex64, SweepError> {
    let mut parts = line.split_whitespace();
    let (Some(re), Some(im)) = (parts.next(), parts.next()) else {
        return Err(SweepError::Protocol(format!("expected 're im', got '{}'", line)));
    };
    let re = re
        .parse::<f64>()
        .map_err(|e| SweepError::Protocol(format!("bad real part '{}': {}", re, e)))?;
    let im = im
        .parse::<f64>()
        .map_err(|e| SweepError::Protocol(format!("bad imaginary part '{}': {}", im, e)))?;
    Ok(Complex64::new(re, im))
}

impl Instrument for NanoVna {
    fn name(&self) -> &str {
        &self.name
    }

    fn connected(&self) -> bool {
        self.transport.lock().map(|t| t.is_open()).unwrap_or(false)
    }

    fn read_frequencies(&self) -> Result<Vec<u64>, SweepError> {
        self.exec("frequencies")?
            .iter()
            .map(|line| {
                line.parse::<u64>()
                    .map_err(|e| SweepError::Protocol(format!("bad frequency '{}': {}", line, e)))
            })
            .collect()
    }

    fn set_sweep(&self, start: u64, stop: u64, points: usize) -> Result<(), SweepError> {
        self.exec(&format!("sweep {} {} {}", start, stop, points))?;
        Ok(())
    }

    fn read_values(&self, parameter: SParameter) -> Result<Vec<Complex64>, SweepError> {
        self.exec(&format!("data {}", parameter.index()))?
            .iter()
            .map(|line| parse_complex(line))
            .collect()
    }
}

/// Driver producing [`NanoVna`] handles
#[derive(Debug, Clone)]
pub struct NanoVnaDriver {
    command_timeout: Duration,
}

impl NanoVnaDriver {
    /// Create a driver with the given per-command timeout
    pub fn new(command_timeout: Duration) -> Self {
        Self { command_timeout }
    }
}

impl Default for NanoVnaDriver {
    fn default() -> Self {
        Self::new(DEFAULT_COMMAND_TIMEOUT)
    }
}

impl InstrumentDriver for NanoVnaDriver {
    fn attach(&self, transport: SharedTransport) -> Result<InstrumentHandle, ConnectError> {
        Ok(Arc::new(NanoVna::new(transport, self.command_timeout)))
    }
}
