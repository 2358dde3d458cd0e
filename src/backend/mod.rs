//! Backend module for talking to the instrument
//!
//! Everything that touches the device lives here and runs off the caller's
//! thread. The controller owns two threads and talks to the worker only
//! through shared status flags and a crossbeam channel.
//!
//! # Architecture
//!
//! - [`Transport`] - Byte link to the instrument (serial port, or simulated)
//! - [`Instrument`] - Command-level access to a VNA over a transport
//! - [`DeviceSessionManager`] - Opens, closes and re-establishes sessions
//! - [`SweepWorker`] - Performs sweeps and saves them into the store
//! - [`SweepSessionController`] - Ties the above together and drives export
//!
//! # Components
//!
//! - [`NanoVna`] - NanoVNA shell protocol driver
//! - [`SimulatedTransportFactory`] / [`SimulatedDriver`] - Hardware-free
//!   stand-ins used by tests and `--simulate`
//!
//! # Example
//!
//! ```ignore
//! use vnasaver_rs::backend::*;
//! use vnasaver_rs::export::{ExportScheduler, PortCount};
//! use vnasaver_rs::store::MeasurementStore;
//!
//! let sessions = DeviceSessionManager::new(
//!     Arc::new(SerialTransportFactory::new(DEFAULT_BAUD_RATE)),
//!     Arc::new(NanoVnaDriver::default()),
//! );
//! let controller = SweepSessionController::new(
//!     ControllerSettings::new("/dev/ttyACM0", SweepConfig::default()),
//!     sessions,
//!     Arc::new(MeasurementStore::default()),
//!     ExportScheduler::new("out", PortCount::Two),
//! );
//! controller.start()?;
//! controller.wait();
//! ```

pub mod controller;
pub mod instrument;
pub mod session;
pub mod simulated;
pub mod transport;
pub mod worker;

pub use controller::{
    ControllerSettings, ControllerState, SweepSessionController, DEFAULT_POLL_INTERVAL,
    EVENT_QUEUE_CAPACITY,
};
pub use instrument::{Instrument, InstrumentDriver, InstrumentHandle, NanoVna, NanoVnaDriver};
pub use session::{DeviceSession, DeviceSessionManager, DEFAULT_SETTLE_DELAY};
pub use simulated::{SimulatedBehavior, SimulatedDriver, SimulatedTransportFactory, TransportOp};
pub use transport::{
    SharedTransport, Transport, TransportFactory, DEFAULT_BAUD_RATE, DEFAULT_READ_TIMEOUT,
    KNOWN_DEVICES,
};
#[cfg(feature = "serial")]
pub use transport::{discover_ports, SerialTransport, SerialTransportFactory};
pub use worker::{InstrumentSlot, SweepWorker, WorkerEvent, WorkerStatus};
