//! Core data types for vnasaver-rs
//!
//! This module contains the measurement and sweep types shared by the
//! backend, the store and the exporter.
//!
//! # Main Types
//!
//! - [`Datapoint`] - One measured frequency sample with its complex value
//! - [`MeasurementBuffer`] - An ordered sweep result for one parameter
//! - [`SParameter`] - Which parameter a buffer holds
//! - [`SweepConfig`] - Frequency range, segmentation and mode of a sweep
//!
//! # Derived Metrics
//!
//! A [`Datapoint`] stores only the raw complex value. Gain, VSWR, phase and
//! impedance are derived on demand so a point is never out of sync with
//! its metrics.

use crate::error::{Result, VnaError};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

/// Default reference impedance in ohms
pub const REFERENCE_IMPEDANCE: f64 = 50.0;

/// Default number of points a NanoVNA returns per sweep
pub const DEFAULT_POINTS: usize = 101;

/// One measured frequency sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Datapoint {
    /// Frequency in Hz
    pub freq: u64,
    /// Real part of the reflection/transmission coefficient
    pub re: f64,
    /// Imaginary part of the reflection/transmission coefficient
    pub im: f64,
}

impl Datapoint {
    /// Create a new datapoint
    pub fn new(freq: u64, re: f64, im: f64) -> Self {
        Self { freq, re, im }
    }

    /// Create a datapoint from a complex value
    pub fn from_complex(freq: u64, z: Complex64) -> Self {
        Self::new(freq, z.re, z.im)
    }

    /// The complex coefficient
    pub fn z(&self) -> Complex64 {
        Complex64::new(self.re, self.im)
    }

    /// Magnitude of the coefficient
    pub fn magnitude(&self) -> f64 {
        self.z().norm()
    }

    /// Gain in dB, negative infinity for a zero coefficient
    pub fn gain(&self) -> f64 {
        let mag = self.magnitude();
        if mag > 0.0 {
            20.0 * mag.log10()
        } else {
            f64::NEG_INFINITY
        }
    }

    /// Voltage standing wave ratio derived from a reflection coefficient
    ///
    /// Returns 1.0 for |Γ| >= 1 where the ratio is undefined.
    pub fn vswr(&self) -> f64 {
        let mag = self.magnitude();
        if mag >= 1.0 {
            1.0
        } else {
            (1.0 + mag) / (1.0 - mag)
        }
    }

    /// Phase in radians
    pub fn phase(&self) -> f64 {
        self.z().arg()
    }

    /// Impedance seen through a reflection coefficient
    pub fn impedance(&self, reference: f64) -> Complex64 {
        let gamma = self.z();
        reference * (Complex64::new(1.0, 0.0) + gamma) / (Complex64::new(1.0, 0.0) - gamma)
    }

    /// Scale the coefficient, keeping the frequency
    pub fn scaled(&self, factor: f64) -> Self {
        Self::from_complex(self.freq, self.z() * factor)
    }
}

/// Ordered sweep result for one parameter (ascending frequency)
pub type MeasurementBuffer = Vec<Datapoint>;

/// Measured network parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SParameter {
    /// Port 1 reflection
    S11,
    /// Port 1 to port 2 transmission
    S21,
}

impl SParameter {
    /// Index used by the instrument's `data` command
    pub fn index(&self) -> u8 {
        match self {
            SParameter::S11 => 0,
            SParameter::S21 => 1,
        }
    }
}

impl std::fmt::Display for SParameter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SParameter::S11 => write!(f, "S11"),
            SParameter::S21 => write!(f, "S21"),
        }
    }
}

/// Whether the worker sweeps once or repeatedly
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SweepMode {
    /// Run one sweep, then finish
    #[default]
    Single,
    /// Repeat until stopped
    Continuous,
}

impl std::fmt::Display for SweepMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SweepMode::Single => write!(f, "single"),
            SweepMode::Continuous => write!(f, "continuous"),
        }
    }
}

/// Sweep range and mode handed to the worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Start frequency in Hz
    pub start: u64,
    /// Stop frequency in Hz
    pub stop: u64,
    /// Points per segment
    #[serde(default = "default_points")]
    pub points: usize,
    /// Number of segments the range is split into
    #[serde(default = "default_segments")]
    pub segments: u32,
    /// Single-pass or continuous
    #[serde(default)]
    pub mode: SweepMode,
    /// Label prefix used for provenance of saved data
    #[serde(default)]
    pub name: String,
}

fn default_points() -> usize {
    DEFAULT_POINTS
}

fn default_segments() -> u32 {
    1
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            start: 3_600_000,
            stop: 30_000_000,
            points: DEFAULT_POINTS,
            segments: 1,
            mode: SweepMode::Single,
            name: String::new(),
        }
    }
}

impl SweepConfig {
    /// Create a single-segment sweep over a range
    pub fn new(start: u64, stop: u64, mode: SweepMode) -> Self {
        Self {
            start,
            stop,
            mode,
            ..Self::default()
        }
    }

    /// Check the range and segmentation
    pub fn validate(&self) -> Result<()> {
        if self.start >= self.stop {
            return Err(VnaError::Config(format!(
                "start frequency {} Hz must be below stop frequency {} Hz",
                self.start, self.stop
            )));
        }
        if self.points < 2 {
            return Err(VnaError::Config(format!(
                "at least 2 points per segment required, got {}",
                self.points
            )));
        }
        if self.segments == 0 {
            return Err(VnaError::Config("segment count must be positive".to_string()));
        }
        Ok(())
    }

    /// Whether the worker keeps sweeping after the first pass
    pub fn is_continuous(&self) -> bool {
        self.mode == SweepMode::Continuous
    }

    /// Total number of points across all segments
    pub fn total_points(&self) -> usize {
        self.points * self.segments as usize
    }

    /// Frequency step between adjacent points over the whole range
    pub fn step(&self) -> f64 {
        let total = self.total_points();
        if total > 1 {
            (self.stop - self.start) as f64 / (total - 1) as f64
        } else {
            0.0
        }
    }

    /// Start and stop frequency of one segment
    pub fn segment_range(&self, index: u32) -> (u64, u64) {
        let step = self.step();
        let start = self.start as f64 + (index as usize * self.points) as f64 * step;
        let stop = start + (self.points - 1) as f64 * step;
        (start.round() as u64, stop.round() as u64)
    }
}
