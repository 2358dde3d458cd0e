//! Sweep worker
//!
//! The worker runs on its own thread and performs sweeps until it is told
//! to stop, the single pass completes, or too many sweeps fail in a row.
//!
//! # Status Hand-off
//!
//! The controller observes the worker only through [`WorkerStatus`] and the
//! [`WorkerEvent`] channel:
//!
//! - `updated` is set after `MeasurementStore::save` has returned, so the
//!   data is visible before the flag is
//! - `pending_errors` counts sweep failures the controller has not handled
//! - `finished` is set last, after any final `updated`, on every exit from
//!   [`SweepWorker::run`] including a panic
//! - `stopped` is written by the controller and checked between segments
//! - `error_message` holds the most recent sweep failure
//!
//! Events are sent with `try_send` and only wake the controller early. A
//! full queue drops them; the flags and counter above carry the state.

use crate::backend::instrument::InstrumentHandle;
use crate::error::SweepError;
use crate::store::MeasurementStore;
use crate::types::{Datapoint, MeasurementBuffer, SParameter, SweepConfig, SweepMode};
use crossbeam_channel::Sender;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

/// Default pause after a failed sweep
pub const DEFAULT_ERROR_BACKOFF: Duration = Duration::from_millis(500);

/// Default number of consecutive failures before the worker gives up
pub const DEFAULT_MAX_CONSECUTIVE_ERRORS: u32 = 5;

/// Slot holding the current instrument handle, if any
pub type InstrumentSlot = Arc<RwLock<Option<InstrumentHandle>>>;

/// Notification sent from the worker to the controller
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    /// A sweep completed and was saved
    Updated {
        /// Store generation after the save
        generation: u64,
    },
    /// A sweep failed
    SweepError(String),
    /// The worker has exited
    Finished,
}

/// Status flags shared between the worker and the controller
#[derive(Debug, Default)]
pub struct WorkerStatus {
    updated: AtomicBool,
    finished: AtomicBool,
    stopped: AtomicBool,
    running: AtomicBool,
    pending_errors: AtomicU32,
    error_message: Mutex<Option<String>>,
}

impl WorkerStatus {
    /// Create a fresh status
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if a new sweep result is waiting
    pub fn is_updated(&self) -> bool {
        self.updated.load(Ordering::SeqCst)
    }

    /// Clear the updated flag, returning whether it was set
    pub fn take_updated(&self) -> bool {
        self.updated.swap(false, Ordering::SeqCst)
    }

    /// Take the number of sweep errors since the last call
    pub fn take_sweep_errors(&self) -> u32 {
        self.pending_errors.swap(0, Ordering::SeqCst)
    }

    /// Check if the worker has exited
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    /// Check if a stop was requested
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Check if the worker is inside `run`
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Ask the worker to stop at its next opportunity
    pub fn request_stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    /// Clear a previous stop request
    pub fn clear_stop(&self) {
        self.stopped.store(false, Ordering::SeqCst);
    }

    /// Most recent sweep error
    pub fn error_message(&self) -> Option<String> {
        self.error_message
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record_error(&self, message: String) {
        *self
            .error_message
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(message);
        self.pending_errors.fetch_add(1, Ordering::SeqCst);
    }

    fn mark_updated(&self) {
        self.updated.store(true, Ordering::SeqCst);
    }

    /// Mark the worker as exited
    pub fn mark_finished(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.finished.store(true, Ordering::SeqCst);
    }
}

/// Marks the worker finished when `run` returns or unwinds
struct FinishGuard<'a> {
    status: &'a WorkerStatus,
    events: &'a Sender<WorkerEvent>,
}

impl Drop for FinishGuard<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            tracing::error!("Sweep worker panicked");
        }
        self.status.mark_finished();
        let _ = self.events.try_send(WorkerEvent::Finished);
    }
}

/// Performs sweeps and hands results to the store
pub struct SweepWorker {
    sweep: SweepConfig,
    store: Arc<MeasurementStore>,
    instrument: InstrumentSlot,
    status: Arc<WorkerStatus>,
    events: Sender<WorkerEvent>,
    error_backoff: Duration,
    max_consecutive_errors: u32,
}

impl SweepWorker {
    /// Create a worker
    ///
    /// The sweep configuration is fixed for the worker's lifetime.
    pub fn new(
        sweep: SweepConfig,
        store: Arc<MeasurementStore>,
        instrument: InstrumentSlot,
        status: Arc<WorkerStatus>,
        events: Sender<WorkerEvent>,
    ) -> Self {
        Self {
            sweep,
            store,
            instrument,
            status,
            events,
            error_backoff: DEFAULT_ERROR_BACKOFF,
            max_consecutive_errors: DEFAULT_MAX_CONSECUTIVE_ERRORS,
        }
    }

    /// Override the pause after a failed sweep
    pub fn with_error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }

    /// Override the consecutive failure limit (minimum 1)
    pub fn with_max_consecutive_errors(mut self, max: u32) -> Self {
        self.max_consecutive_errors = max.max(1);
        self
    }

    /// Shared status flags
    pub fn status(&self) -> &Arc<WorkerStatus> {
        &self.status
    }

    /// The sweep this worker performs
    pub fn sweep(&self) -> &SweepConfig {
        &self.sweep
    }

    /// Run sweeps until stopped, done, or failing persistently
    pub fn run(&self) {
        tracing::info!(
            "Sweep worker started ({} mode, {} - {} Hz, {} x {} points)",
            self.sweep.mode,
            self.sweep.start,
            self.sweep.stop,
            self.sweep.segments,
            self.sweep.points
        );
        self.status.running.store(true, Ordering::SeqCst);
        let _finish = FinishGuard {
            status: &self.status,
            events: &self.events,
        };

        if let Err(e) = self.sweep.validate() {
            tracing::error!("Sweep worker not started: {}", e);
            self.status.record_error(e.to_string());
            return;
        }

        let mut consecutive_errors = 0;
        loop {
            if self.status.is_stopped() {
                tracing::info!("Sweep worker stop requested");
                break;
            }

            match self.sweep_once() {
                Ok((s11, s21)) => {
                    consecutive_errors = 0;
                    self.store.save(s11, s21, None);
                    let generation = self.store.generation();
                    self.status.mark_updated();
                    let _ = self.events.try_send(WorkerEvent::Updated { generation });
                    tracing::debug!("Sweep {} complete", generation);

                    if self.sweep.mode == SweepMode::Single {
                        break;
                    }
                }
                Err(SweepError::Cancelled) => {
                    tracing::info!("Sweep cancelled");
                    break;
                }
                Err(e) => {
                    consecutive_errors += 1;
                    let message = e.to_string();
                    tracing::error!(
                        "Sweep failed ({}/{}): {}",
                        consecutive_errors,
                        self.max_consecutive_errors,
                        message
                    );
                    self.status.record_error(message.clone());
                    let _ = self.events.try_send(WorkerEvent::SweepError(message));

                    if consecutive_errors >= self.max_consecutive_errors {
                        tracing::error!("Giving up after {} failed sweeps", consecutive_errors);
                        break;
                    }
                    std::thread::sleep(self.error_backoff);
                }
            }
        }

        tracing::info!("Sweep worker stopped");
    }

    /// Sweep every segment once
    fn sweep_once(&self) -> Result<(MeasurementBuffer, MeasurementBuffer), SweepError> {
        let instrument = self
            .instrument
            .read()
            .map_err(|_| SweepError::Poisoned)?
            .clone()
            .ok_or(SweepError::NotConnected)?;
        if !instrument.connected() {
            return Err(SweepError::NotConnected);
        }

        let capacity = self.sweep.total_points();
        let mut s11 = Vec::with_capacity(capacity);
        let mut s21 = Vec::with_capacity(capacity);

        for segment in 0..self.sweep.segments {
            if self.status.is_stopped() {
                return Err(SweepError::Cancelled);
            }
            let (start, stop) = self.sweep.segment_range(segment);
            tracing::debug!("Segment {}: {} - {} Hz", segment, start, stop);

            instrument.set_sweep(start, stop, self.sweep.points)?;
            let frequencies = instrument.read_frequencies()?;
            let values11 = instrument.read_values(SParameter::S11)?;
            let values21 = instrument.read_values(SParameter::S21)?;

            for values in [&values11, &values21] {
                if values.len() != frequencies.len() {
                    return Err(SweepError::LengthMismatch {
                        frequencies: frequencies.len(),
                        values: values.len(),
                    });
                }
            }

            s11.extend(
                frequencies
                    .iter()
                    .zip(values11)
                    .map(|(&freq, z)| Datapoint::from_complex(freq, z)),
            );
            s21.extend(
                frequencies
                    .iter()
                    .zip(values21)
                    .map(|(&freq, z)| Datapoint::from_complex(freq, z)),
            );
        }

        Ok((s11, s21))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::instrument::{Instrument, InstrumentDriver};
    use num_complex::Complex64;
    use crate::backend::simulated::{SimulatedDriver, SimulatedTransportFactory};
    use crate::backend::transport::TransportFactory;
    use crossbeam_channel::{bounded, Receiver};

    fn create_test_worker(
        sweep: SweepConfig,
    ) -> (SweepWorker, Receiver<WorkerEvent>, SimulatedDriver, Arc<MeasurementStore>) {
        let factory = SimulatedTransportFactory::new();
        let driver = SimulatedDriver::new();
        let mut transport = factory.create("sim0");
        transport.open(Duration::from_millis(50)).unwrap();
        let handle = driver
            .attach(Arc::new(Mutex::new(transport)))
            .unwrap();

        let (tx, rx) = bounded(16);
        let store = Arc::new(MeasurementStore::default());
        let worker = SweepWorker::new(
            sweep,
            store.clone(),
            Arc::new(RwLock::new(Some(handle))),
            Arc::new(WorkerStatus::new()),
            tx,
        )
        .with_error_backoff(Duration::ZERO);

        (worker, rx, driver, store)
    }

    #[test]
    fn test_single_sweep() {
        let sweep = SweepConfig::new(1_000_000, 30_000_000, SweepMode::Single);
        let (worker, rx, _, store) = create_test_worker(sweep);

        worker.run();

        let (s11, s21) = store.snapshot();
        assert_eq!(s11.len(), 101);
        assert_eq!(s21.len(), 101);
        assert_eq!(s11[0].freq, 1_000_000);
        assert_eq!(s11[100].freq, 30_000_000);
        assert!(worker.status().is_updated());
        assert!(worker.status().is_finished());
        assert!(!worker.status().is_running());

        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            events,
            vec![WorkerEvent::Updated { generation: 1 }, WorkerEvent::Finished]
        );
    }

    #[test]
    fn test_segmented_sweep() {
        let mut sweep = SweepConfig::new(1_000_000, 1_000_000 + 19 * 1000, SweepMode::Single);
        sweep.points = 10;
        sweep.segments = 2;
        let (worker, _, driver, store) = create_test_worker(sweep);

        worker.run();

        let (s11, _) = store.snapshot();
        assert_eq!(s11.len(), 20);
        assert!(s11.windows(2).all(|w| w[0].freq < w[1].freq));
        assert_eq!(driver.behavior().sweeps_requested(), 2);
    }

    #[test]
    fn test_error_then_recovery() {
        let sweep = SweepConfig::new(1_000_000, 30_000_000, SweepMode::Single);
        let (worker, rx, driver, store) = create_test_worker(sweep);
        driver.behavior().fail_next_sweeps(1);

        worker.run();

        assert_eq!(store.generation(), 1);
        assert_eq!(
            worker.status().error_message().as_deref(),
            Some("malformed response: simulated sweep failure")
        );
        let events: Vec<_> = rx.try_iter().collect();
        assert!(matches!(events[0], WorkerEvent::SweepError(_)));
        assert_eq!(events[1], WorkerEvent::Updated { generation: 1 });
        assert_eq!(events[2], WorkerEvent::Finished);
    }

    #[test]
    fn test_gives_up_after_max_errors() {
        let sweep = SweepConfig::new(1_000_000, 30_000_000, SweepMode::Continuous);
        let (worker, _, driver, store) = create_test_worker(sweep);
        let worker = worker.with_max_consecutive_errors(3);
        driver.behavior().fail_next_sweeps(10);

        worker.run();

        assert_eq!(store.generation(), 0);
        assert_eq!(driver.behavior().sweeps_requested(), 3);
        assert!(worker.status().is_finished());
        assert!(!worker.status().is_updated());
    }

    #[test]
    fn test_stop_before_run() {
        let sweep = SweepConfig::new(1_000_000, 30_000_000, SweepMode::Continuous);
        let (worker, _, _, store) = create_test_worker(sweep);

        worker.status().request_stop();
        worker.run();

        assert_eq!(store.generation(), 0);
        assert!(worker.status().is_finished());
    }

    #[test]
    fn test_errors_counted_when_event_queue_full() {
        let sweep = SweepConfig::new(1_000_000, 30_000_000, SweepMode::Single);
        let (worker, rx, driver, store) = create_test_worker(sweep);
        while worker.events.try_send(WorkerEvent::Updated { generation: 0 }).is_ok() {}
        driver.behavior().fail_next_sweeps(1);

        worker.run();

        assert_eq!(store.generation(), 1);
        assert_eq!(worker.status().take_sweep_errors(), 1);
        assert_eq!(worker.status().take_sweep_errors(), 0);
        assert!(worker.status().is_finished());
        assert!(rx
            .try_iter()
            .all(|event| event == WorkerEvent::Updated { generation: 0 }));
    }

    struct PanickingVna;

    impl Instrument for PanickingVna {
        fn name(&self) -> &str {
            "panicking"
        }

        fn connected(&self) -> bool {
            true
        }

        fn read_frequencies(&self) -> Result<Vec<u64>, SweepError> {
            Ok(vec![1_000_000, 2_000_000])
        }

        fn set_sweep(&self, _start: u64, _stop: u64, _points: usize) -> Result<(), SweepError> {
            panic!("instrument driver bug");
        }

        fn read_values(&self, _parameter: SParameter) -> Result<Vec<Complex64>, SweepError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_panic_still_marks_finished() {
        let (tx, rx) = bounded(16);
        let status = Arc::new(WorkerStatus::new());
        let handle: InstrumentHandle = Arc::new(PanickingVna);
        let worker = SweepWorker::new(
            SweepConfig::default(),
            Arc::new(MeasurementStore::default()),
            Arc::new(RwLock::new(Some(handle))),
            status.clone(),
            tx,
        );

        let result = std::thread::spawn(move || worker.run()).join();

        assert!(result.is_err());
        assert!(status.is_finished());
        assert!(!status.is_running());
        assert_eq!(rx.try_iter().last(), Some(WorkerEvent::Finished));
    }

    #[test]
    fn test_invalid_sweep_is_not_run() {
        let sweep = SweepConfig::new(30_000_000, 1_000_000, SweepMode::Single);
        let (worker, _, driver, store) = create_test_worker(sweep);

        worker.run();

        assert!(worker.status().is_finished());
        assert_eq!(driver.behavior().sweeps_requested(), 0);
        assert_eq!(store.generation(), 0);
        assert!(worker
            .status()
            .error_message()
            .is_some_and(|message| message.contains("must be below")));
    }

    #[test]
    fn test_no_instrument() {
        let (tx, _rx) = bounded(16);
        let worker = SweepWorker::new(
            SweepConfig::default(),
            Arc::new(MeasurementStore::default()),
            Arc::new(RwLock::new(None)),
            Arc::new(WorkerStatus::new()),
            tx,
        )
        .with_error_backoff(Duration::ZERO)
        .with_max_consecutive_errors(1);

        worker.run();
        assert_eq!(
            worker.status().error_message().as_deref(),
            Some("instrument not connected")
        );
    }
}
