//! Measurement store
//!
//! Holds the latest sweep result and the reference data. The live S11/S21
//! pair, its provenance label and a generation counter are replaced
//! together under one mutex, so a reader can never see S11 from one sweep
//! next to S21 from another. The mutex is only held for the copy or the
//! swap; attenuation correction and observer notification run outside it.
//!
//! # Reference Data
//!
//! A reference is an independent copy of a measurement pair, set from the
//! live data or from a Touchstone file, and kept until reset or replaced.
//! Registered [`ReferenceObserver`]s are told about every change.

use crate::error::Result;
use crate::export::touchstone::Touchstone;
use crate::types::{Datapoint, MeasurementBuffer};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

/// Timestamp format used in synthesized provenance labels
pub const SOURCE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Consumer of reference changes (charts, comparators, ...)
pub trait ReferenceObserver: Send + Sync {
    /// A new reference was set
    fn reference_set(&self, s11: &[Datapoint], s21: &[Datapoint]);

    /// The reference was cleared
    fn reference_reset(&self);
}

/// Reference buffers and their provenance
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReferenceData {
    /// Reference S11
    pub s11: MeasurementBuffer,
    /// Reference S21
    pub s21: MeasurementBuffer,
    /// Where the reference came from
    pub source: String,
}

impl ReferenceData {
    /// Check if a reference is set
    pub fn is_empty(&self) -> bool {
        self.s11.is_empty() && self.s21.is_empty()
    }
}

/// A consistent copy of the live data
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeasurementSnapshot {
    /// Live S11
    pub s11: MeasurementBuffer,
    /// Live S21
    pub s21: MeasurementBuffer,
    /// Provenance label of the sweep
    pub source: String,
    /// Number of `save` calls that produced this data
    pub generation: u64,
}

/// Extremes of a measurement pair
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SummaryStats {
    /// S11 point with the lowest VSWR
    pub min_vswr: Option<Datapoint>,
    /// S21 point with the lowest gain
    pub min_gain: Option<Datapoint>,
    /// S21 point with the highest gain
    pub max_gain: Option<Datapoint>,
}

impl SummaryStats {
    /// Check if there was no data to summarize
    pub fn is_empty(&self) -> bool {
        self.min_vswr.is_none() && self.min_gain.is_none() && self.max_gain.is_none()
    }
}

impl std::fmt::Display for SummaryStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return write!(f, "no data");
        }
        if let Some(dp) = self.min_vswr {
            write!(
                f,
                "min VSWR {:.3} @ {} Hz (phase {:.1} deg)",
                dp.vswr(),
                dp.freq,
                dp.phase().to_degrees()
            )?;
        }
        if let (Some(min), Some(max)) = (self.min_gain, self.max_gain) {
            if self.min_vswr.is_some() {
                write!(f, ", ")?;
            }
            write!(
                f,
                "gain {:.2} dB @ {} Hz .. {:.2} dB @ {} Hz",
                min.gain(),
                min.freq,
                max.gain(),
                max.freq
            )?;
        }
        Ok(())
    }
}

/// Summarize a measurement pair
///
/// Empty buffers yield `None` entries rather than an error.
pub fn compute_summary(s11: &[Datapoint], s21: &[Datapoint]) -> SummaryStats {
    SummaryStats {
        min_vswr: s11.iter().copied().min_by(|a, b| a.vswr().total_cmp(&b.vswr())),
        min_gain: s21.iter().copied().min_by(|a, b| a.gain().total_cmp(&b.gain())),
        max_gain: s21.iter().copied().max_by(|a, b| a.gain().total_cmp(&b.gain())),
    }
}

/// Apply a scalar attenuation correction (dB) to transmission data
///
/// Non-positive attenuation returns the input untouched.
pub fn correct_attenuation(data: MeasurementBuffer, attenuation_db: f64) -> MeasurementBuffer {
    if attenuation_db <= 0.0 {
        return data;
    }
    let factor = 10f64.powf(attenuation_db / 20.0);
    data.into_iter().map(|dp| dp.scaled(factor)).collect()
}

#[derive(Debug, Default)]
struct LiveData {
    s11: MeasurementBuffer,
    s21: MeasurementBuffer,
    source: String,
    generation: u64,
}

/// Thread-safe store for live and reference measurements
pub struct MeasurementStore {
    live: Mutex<LiveData>,
    reference: RwLock<ReferenceData>,
    observers: RwLock<Vec<Arc<dyn ReferenceObserver>>>,
    s21_attenuation_db: f64,
    sweep_name: String,
}

impl Default for MeasurementStore {
    fn default() -> Self {
        Self::new(0.0, "")
    }
}

impl MeasurementStore {
    /// Create an empty store
    ///
    /// `sweep_name` prefixes synthesized provenance labels.
    pub fn new(s21_attenuation_db: f64, sweep_name: impl Into<String>) -> Self {
        Self {
            live: Mutex::new(LiveData::default()),
            reference: RwLock::new(ReferenceData::default()),
            observers: RwLock::new(Vec::new()),
            s21_attenuation_db,
            sweep_name: sweep_name.into(),
        }
    }

    fn live(&self) -> MutexGuard<'_, LiveData> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Configured S21 attenuation in dB
    pub fn s21_attenuation_db(&self) -> f64 {
        self.s21_attenuation_db
    }

    /// Replace the live data with a new sweep result
    pub fn save(&self, s11: MeasurementBuffer, s21: MeasurementBuffer, source: Option<String>) {
        let s21 = correct_attenuation(s21, self.s21_attenuation_db);
        let source = source.unwrap_or_else(|| {
            format!(
                "{} {}",
                self.sweep_name,
                chrono::Local::now().format(SOURCE_TIMESTAMP_FORMAT)
            )
            .trim_start()
            .to_string()
        });

        let mut live = self.live();
        live.s11 = s11;
        live.s21 = s21;
        live.source = source;
        live.generation += 1;
    }

    /// Copies of the live S11 and S21 buffers, taken atomically
    pub fn snapshot(&self) -> (MeasurementBuffer, MeasurementBuffer) {
        let live = self.live();
        (live.s11.clone(), live.s21.clone())
    }

    /// Copy of the live data with provenance and generation
    pub fn snapshot_with_source(&self) -> MeasurementSnapshot {
        let live = self.live();
        MeasurementSnapshot {
            s11: live.s11.clone(),
            s21: live.s21.clone(),
            source: live.source.clone(),
            generation: live.generation,
        }
    }

    /// Provenance label of the live data
    pub fn sweep_source(&self) -> String {
        self.live().source.clone()
    }

    /// Number of completed `save` calls
    pub fn generation(&self) -> u64 {
        self.live().generation
    }

    /// Register a reference observer
    pub fn subscribe(&self, observer: Arc<dyn ReferenceObserver>) {
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    /// Set the reference data
    ///
    /// Without S11 data the current live pair is used. Without a source the
    /// live provenance is used.
    pub fn set_reference(
        &self,
        s11: Option<MeasurementBuffer>,
        s21: Option<MeasurementBuffer>,
        source: Option<String>,
    ) {
        let (s11, s21, live_source) = match s11 {
            Some(s11) if !s11.is_empty() => (s11, s21.unwrap_or_default(), None),
            _ => {
                let live = self.snapshot_with_source();
                (live.s11, live.s21, Some(live.source))
            }
        };
        let source = match (source, live_source) {
            (Some(source), _) => source,
            (None, Some(live_source)) => live_source,
            (None, None) => self.sweep_source(),
        };

        let reference = ReferenceData { s11, s21, source };
        tracing::debug!("Reference set from '{}'", reference.source);
        *self.reference.write().unwrap_or_else(PoisonError::into_inner) = reference.clone();
        for observer in self.observers().iter() {
            observer.reference_set(&reference.s11, &reference.s21);
        }
    }

    /// Clear the reference data
    pub fn reset_reference(&self) {
        *self.reference.write().unwrap_or_else(PoisonError::into_inner) = ReferenceData::default();
        for observer in self.observers().iter() {
            observer.reference_reset();
        }
        tracing::debug!("Reference reset");
    }

    /// Copy of the reference data
    pub fn reference(&self) -> ReferenceData {
        self.reference
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the reference with the contents of a Touchstone file
    pub fn load_reference_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let touchstone = Touchstone::load(path)?;
        self.reset_reference();
        self.set_reference(
            Some(touchstone.s11),
            Some(touchstone.s21),
            Some(path.display().to_string()),
        );
        tracing::info!("Loaded reference from {}", path.display());
        Ok(())
    }

    fn observers(&self) -> Vec<Arc<dyn ReferenceObserver>> {
        self.observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
