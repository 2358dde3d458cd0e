//! # vnasaver-rs: NanoVNA sweep session controller
//!
//! Drives a NanoVNA-class vector network analyzer over a serial link, runs
//! single or continuous frequency sweeps, and writes every completed sweep
//! to a timestamped Touchstone file.
//!
//! ## Architecture
//!
//! - **Backend**: Transport, instrument driver, device session, sweep
//!   worker and the controller tying them together
//! - **Store**: Latest S11/S21 pair and reference data behind one lock
//! - **Export**: Touchstone writer and the per-update export scheduler
//! - **Communication**: Atomic status flags plus a crossbeam channel
//!   between the worker and the controller
//!
//! ## Example
//!
//! ```ignore
//! use vnasaver_rs::{
//!     backend::{ControllerSettings, DeviceSessionManager, SweepSessionController},
//!     config::AppConfig,
//!     export::ExportScheduler,
//!     store::MeasurementStore,
//! };
//!
//! let config = AppConfig::load_default()?;
//! let controller = SweepSessionController::new(
//!     ControllerSettings::new("/dev/ttyACM0", config.sweep.clone()),
//!     sessions,
//!     Arc::new(MeasurementStore::new(0.0, "")),
//!     ExportScheduler::new(&config.export.output_dir, config.export.ports),
//! );
//! controller.start()?;
//! controller.wait();
//! controller.shutdown();
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod export;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use backend::{ControllerState, SweepSessionController};
pub use config::AppConfig;
pub use error::{Result, VnaError};
pub use export::{ExportScheduler, PortCount, Touchstone};
pub use store::MeasurementStore;
pub use types::{Datapoint, SweepConfig, SweepMode};
