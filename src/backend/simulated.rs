//! Simulated transport and VNA for testing
//!
//! This module provides a simulated instrument link so the controller can
//! be exercised without hardware, either from tests or with `--simulate`.
//!
//! # Features
//!
//! - **Operation log**: every open/close/flush on the transport is recorded
//! - **Failure injection**: refuse to open, report closed, fail sweeps,
//!   answer the frequency query with nothing
//! - **Synthetic response**: S11 of a series RLC resonator and S21 of a
//!   first-order low-pass, evaluated at each swept frequency
//!
//! # Example
//!
//! ```ignore
//! let factory = SimulatedTransportFactory::new();
//! let driver = SimulatedDriver::new();
//! driver.behavior().fail_next_sweeps(1);
//!
//! let manager = DeviceSessionManager::new(Arc::new(factory.clone()), Arc::new(driver));
//! // ... drive the controller, then inspect factory.ops()
//! ```

use crate::backend::instrument::{Instrument, InstrumentDriver, InstrumentHandle};
use crate::backend::transport::{SharedTransport, Transport, TransportFactory};
use crate::error::{ConnectError, SweepError};
use crate::types::{SParameter, REFERENCE_IMPEDANCE};
use num_complex::Complex64;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Operation performed on a simulated transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportOp {
    /// `open` was called
    Open,
    /// `close` was called
    Close,
    /// `flush_buffers` was called
    Flush,
}

/// State shared between a simulated transport and the test observing it
#[derive(Debug, Default)]
struct LinkState {
    ops: Vec<TransportOp>,
    open: bool,
    refuse_open: bool,
    report_closed: bool,
}

/// Simulated byte transport
pub struct SimulatedTransport {
    identifier: String,
    state: Arc<Mutex<LinkState>>,
}

impl SimulatedTransport {
    fn state(&self) -> std::sync::MutexGuard<'_, LinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Transport for SimulatedTransport {
    fn identifier(&self) -> String {
        self.identifier.clone()
    }

    fn open(&mut self, _timeout: Duration) -> io::Result<()> {
        let mut state = self.state();
        state.ops.push(TransportOp::Open);
        if state.refuse_open {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "simulated port refused to open",
            ));
        }
        state.open = !state.report_closed;
        Ok(())
    }

    fn close(&mut self) {
        let mut state = self.state();
        state.ops.push(TransportOp::Close);
        state.open = false;
    }

    fn is_open(&self) -> bool {
        self.state().open
    }

    fn flush_buffers(&mut self) -> io::Result<()> {
        self.state().ops.push(TransportOp::Flush);
        Ok(())
    }

    fn write_all(&mut self, _data: &[u8]) -> io::Result<()> {
        Ok(())
    }

    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Ok(0)
    }
}

/// Factory handing out simulated transports that share one link state
#[derive(Clone, Default)]
pub struct SimulatedTransportFactory {
    state: Arc<Mutex<LinkState>>,
}

impl SimulatedTransportFactory {
    /// Create a factory whose transports open normally
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, LinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make subsequent `open` calls fail
    pub fn refuse_open(&self, refuse: bool) {
        self.state().refuse_open = refuse;
    }

    /// Make subsequent `open` calls succeed but leave the link closed
    pub fn report_closed(&self, closed: bool) {
        self.state().report_closed = closed;
    }

    /// Drop the link as if the cable was pulled
    pub fn disconnect(&self) {
        self.state().open = false;
    }

    /// Operations recorded so far
    pub fn ops(&self) -> Vec<TransportOp> {
        self.state().ops.clone()
    }
}

impl TransportFactory for SimulatedTransportFactory {
    fn create(&self, identifier: &str) -> Box<dyn Transport> {
        Box::new(SimulatedTransport {
            identifier: identifier.to_string(),
            state: self.state.clone(),
        })
    }
}

/// Knobs controlling the simulated instrument
#[derive(Debug, Default)]
pub struct SimulatedBehavior {
    failing_sweeps: AtomicU32,
    silent: AtomicBool,
    sweeps: AtomicU64,
    sweep_delay_ms: AtomicU64,
}

impl SimulatedBehavior {
    /// Fail the next `count` sweeps
    pub fn fail_next_sweeps(&self, count: u32) {
        self.failing_sweeps.store(count, Ordering::SeqCst);
    }

    /// Answer the frequency query with no data
    pub fn set_silent(&self, silent: bool) {
        self.silent.store(silent, Ordering::SeqCst);
    }

    /// Delay every sweep configuration by `delay`
    pub fn set_sweep_delay(&self, delay: Duration) {
        self.sweep_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Number of sweeps requested so far (including failed ones)
    pub fn sweeps_requested(&self) -> u64 {
        self.sweeps.load(Ordering::SeqCst)
    }
}

/// Simulated VNA
pub struct SimulatedVna {
    transport: SharedTransport,
    behavior: Arc<SimulatedBehavior>,
    range: Mutex<(u64, u64, usize)>,
}

impl SimulatedVna {
    /// Series RLC resonance (Hz) of the simulated S11 load
    pub const RESONANCE_HZ: f64 = 14_000_000.0;
    /// Corner frequency (Hz) of the simulated S21 low-pass
    pub const CORNER_HZ: f64 = 20_000_000.0;

    fn range(&self) -> (u64, u64, usize) {
        *self.range.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn frequencies(&self) -> Vec<u64> {
        let (start, stop, points) = self.range();
        if points < 2 {
            return vec![start];
        }
        let step = (stop - start) as f64 / (points - 1) as f64;
        (0..points)
            .map(|i| (start as f64 + i as f64 * step).round() as u64)
            .collect()
    }

    fn s11_at(freq: u64) -> Complex64 {
        let omega = 2.0 * std::f64::consts::PI * freq as f64;
        let inductance = 1e-6;
        let capacitance =
            1.0 / ((2.0 * std::f64::consts::PI * Self::RESONANCE_HZ).powi(2) * inductance);
        let z = Complex64::new(REFERENCE_IMPEDANCE * 0.8, omega * inductance - 1.0 / (omega * capacitance));
        (z - REFERENCE_IMPEDANCE) / (z + REFERENCE_IMPEDANCE)
    }

    fn s21_at(freq: u64) -> Complex64 {
        Complex64::new(1.0, 0.0) / Complex64::new(1.0, freq as f64 / Self::CORNER_HZ)
    }
}

impl Instrument for SimulatedVna {
    fn name(&self) -> &str {
        "Simulated VNA"
    }

    fn connected(&self) -> bool {
        self.transport
            .lock()
            .map(|t| t.is_open())
            .unwrap_or(false)
    }

    fn read_frequencies(&self) -> Result<Vec<u64>, SweepError> {
        if !self.connected() {
            return Err(SweepError::NotConnected);
        }
        if self.behavior.silent.load(Ordering::SeqCst) {
            return Ok(Vec::new());
        }
        Ok(self.frequencies())
    }

    fn set_sweep(&self, start: u64, stop: u64, points: usize) -> Result<(), SweepError> {
        self.behavior.sweeps.fetch_add(1, Ordering::SeqCst);

        let delay = self.behavior.sweep_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            std::thread::sleep(Duration::from_millis(delay));
        }

        let failing = self.behavior.failing_sweeps.load(Ordering::SeqCst);
        if failing > 0 {
            self.behavior.failing_sweeps.store(failing - 1, Ordering::SeqCst);
            return Err(SweepError::Protocol("simulated sweep failure".to_string()));
        }
        if !self.connected() {
            return Err(SweepError::NotConnected);
        }

        *self.range.lock().unwrap_or_else(PoisonError::into_inner) = (start, stop, points);
        Ok(())
    }

    fn read_values(&self, parameter: SParameter) -> Result<Vec<Complex64>, SweepError> {
        if !self.connected() {
            return Err(SweepError::NotConnected);
        }
        let model = match parameter {
            SParameter::S11 => Self::s11_at,
            SParameter::S21 => Self::s21_at,
        };
        Ok(self.frequencies().into_iter().map(model).collect())
    }
}

/// Driver producing [`SimulatedVna`] handles
#[derive(Clone)]
pub struct SimulatedDriver {
    behavior: Arc<SimulatedBehavior>,
    initial_range: (u64, u64, usize),
}

impl Default for SimulatedDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedDriver {
    /// Create a driver whose instrument starts at 50 kHz - 900 MHz, 101 points
    pub fn new() -> Self {
        Self {
            behavior: Arc::new(SimulatedBehavior::default()),
            initial_range: (50_000, 900_000_000, 101),
        }
    }

    /// Behaviour knobs shared with every attached instrument
    pub fn behavior(&self) -> Arc<SimulatedBehavior> {
        self.behavior.clone()
    }
}

impl InstrumentDriver for SimulatedDriver {
    fn attach(&self, transport: SharedTransport) -> Result<InstrumentHandle, ConnectError> {
        Ok(Arc::new(SimulatedVna {
            transport,
            behavior: self.behavior.clone(),
            range: Mutex::new(self.initial_range),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attached() -> (SimulatedTransportFactory, SimulatedDriver, InstrumentHandle) {
        let factory = SimulatedTransportFactory::new();
        let driver = SimulatedDriver::new();
        let mut transport = factory.create("sim0");
        transport.open(Duration::from_millis(50)).unwrap();
        let handle = driver
            .attach(Arc::new(Mutex::new(transport)))
            .unwrap();
        (factory, driver, handle)
    }

    #[test]
    fn test_transport_records_ops() {
        let factory = SimulatedTransportFactory::new();
        let mut transport = factory.create("sim0");

        transport.open(Duration::from_millis(50)).unwrap();
        assert!(transport.is_open());
        transport.flush_buffers().unwrap();
        transport.close();
        assert!(!transport.is_open());

        assert_eq!(
            factory.ops(),
            vec![TransportOp::Open, TransportOp::Flush, TransportOp::Close]
        );
    }

    #[test]
    fn test_refuse_open() {
        let factory = SimulatedTransportFactory::new();
        factory.refuse_open(true);
        let mut transport = factory.create("sim0");
        assert!(transport.open(Duration::from_millis(50)).is_err());
        assert!(!transport.is_open());
    }

    #[test]
    fn test_sweep_data() {
        let (_factory, _driver, vna) = attached();
        vna.set_sweep(1_000_000, 30_000_000, 11).unwrap();

        let freqs = vna.read_frequencies().unwrap();
        assert_eq!(freqs.len(), 11);
        assert_eq!(freqs[0], 1_000_000);
        assert_eq!(freqs[10], 30_000_000);

        let s11 = vna.read_values(SParameter::S11).unwrap();
        let s21 = vna.read_values(SParameter::S21).unwrap();
        assert_eq!(s11.len(), 11);
        assert_eq!(s21.len(), 11);
        assert!(s11.iter().all(|z| z.norm() <= 1.0));
    }

    #[test]
    fn test_failure_injection() {
        let (_factory, driver, vna) = attached();
        driver.behavior().fail_next_sweeps(1);

        assert!(vna.set_sweep(1_000_000, 2_000_000, 11).is_err());
        assert!(vna.set_sweep(1_000_000, 2_000_000, 11).is_ok());
        assert_eq!(driver.behavior().sweeps_requested(), 2);
    }

    #[test]
    fn test_disconnect_and_silent() {
        let (factory, driver, vna) = attached();
        assert!(vna.frequency_span().is_some());

        driver.behavior().set_silent(true);
        assert_eq!(vna.frequency_span(), None);

        factory.disconnect();
        assert!(!vna.connected());
        assert!(matches!(
            vna.read_values(SParameter::S11),
            Err(SweepError::NotConnected)
        ));
    }
}
