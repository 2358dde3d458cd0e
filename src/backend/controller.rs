//! Sweep session controller
//!
//! Top-level coordinator. It connects the device session, then runs two
//! threads:
//!
//! - `sweep-worker` runs [`SweepWorker::run`] via [`SweepSessionController::sweep_start`]
//! - `sweep-poll` watches the worker's status, exports every update,
//!   reconnects after sweep errors and exits once the worker has finished
//!
//! # States
//!
//! ```text
//! Idle -> Connecting -> Running -> (Updating | Reconnecting) -> Running -> Finished
//!              |
//!              +-> Failed
//! ```
//!
//! An invalid sweep or a failure while connecting is terminal: no thread is
//! spawned and no sweep is ever started. Failures while running are logged
//! and the session keeps going.
//!
//! Reconnects follow the worker's pending error count rather than the
//! events, so a sweep error is handled even when the event queue was full.
//! Errors that pile up between two polls are handled by a single reconnect.

use crate::backend::session::{DeviceSession, DeviceSessionManager};
use crate::backend::worker::{InstrumentSlot, SweepWorker, WorkerEvent, WorkerStatus};
use crate::error::{ConnectError, Result, VnaError};
use crate::export::ExportScheduler;
use crate::store::{compute_summary, MeasurementStore};
use crate::types::SweepConfig;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Default interval between status checks
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Capacity of the worker-to-controller event queue
pub const EVENT_QUEUE_CAPACITY: usize = 64;

/// Controller lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControllerState {
    /// Constructed, not started
    #[default]
    Idle,
    /// Opening the device session
    Connecting,
    /// Worker running, waiting for status changes
    Running,
    /// Handing a new sweep result to the exporter
    Updating,
    /// Re-establishing the device session after a sweep error
    Reconnecting,
    /// Worker finished and polling stopped
    Finished,
    /// Invalid sweep or could not connect; nothing was started
    Failed,
}

impl ControllerState {
    /// Check if no further transitions will happen
    pub fn is_terminal(&self) -> bool {
        matches!(self, ControllerState::Finished | ControllerState::Failed)
    }

    /// Display name for the state
    pub fn display_name(&self) -> &'static str {
        match self {
            ControllerState::Idle => "Idle",
            ControllerState::Connecting => "Connecting",
            ControllerState::Running => "Running",
            ControllerState::Updating => "Updating",
            ControllerState::Reconnecting => "Reconnecting",
            ControllerState::Finished => "Finished",
            ControllerState::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for ControllerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Timing and identity settings for one controller
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    /// Transport identifier (serial port name)
    pub port: String,
    /// Sweep handed to the worker
    pub sweep: SweepConfig,
    /// Interval between status checks
    pub poll_interval: Duration,
    /// Warn when no sweep completes for this long
    pub watchdog: Option<Duration>,
    /// Pause after a failed sweep
    pub error_backoff: Duration,
    /// Consecutive failed sweeps before the worker gives up
    pub max_consecutive_errors: u32,
}

impl ControllerSettings {
    /// Settings with default timing
    pub fn new(port: impl Into<String>, sweep: SweepConfig) -> Self {
        Self {
            port: port.into(),
            sweep,
            poll_interval: DEFAULT_POLL_INTERVAL,
            watchdog: None,
            error_backoff: crate::backend::worker::DEFAULT_ERROR_BACKOFF,
            max_consecutive_errors: crate::backend::worker::DEFAULT_MAX_CONSECUTIVE_ERRORS,
        }
    }
}

struct ControllerInner {
    port: String,
    poll_interval: Duration,
    watchdog: Option<Duration>,
    sessions: DeviceSessionManager,
    session: Mutex<Option<DeviceSession>>,
    instrument: InstrumentSlot,
    store: Arc<MeasurementStore>,
    exporter: ExportScheduler,
    worker: SweepWorker,
    status: Arc<WorkerStatus>,
    events: Receiver<WorkerEvent>,
    state: Mutex<ControllerState>,
}

/// Coordinates the device session, the sweep worker and export
pub struct SweepSessionController {
    inner: Arc<ControllerInner>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl SweepSessionController {
    /// Create a controller; nothing is opened until [`start`](Self::start)
    pub fn new(
        settings: ControllerSettings,
        sessions: DeviceSessionManager,
        store: Arc<MeasurementStore>,
        exporter: ExportScheduler,
    ) -> Self {
        let (events_tx, events_rx) = bounded(EVENT_QUEUE_CAPACITY);
        let status = Arc::new(WorkerStatus::new());
        let instrument: InstrumentSlot = Arc::new(RwLock::new(None));

        let worker = SweepWorker::new(
            settings.sweep,
            store.clone(),
            instrument.clone(),
            status.clone(),
            events_tx,
        )
        .with_error_backoff(settings.error_backoff)
        .with_max_consecutive_errors(settings.max_consecutive_errors);

        Self {
            inner: Arc::new(ControllerInner {
                port: settings.port,
                poll_interval: settings.poll_interval,
                watchdog: settings.watchdog,
                sessions,
                session: Mutex::new(None),
                instrument,
                store,
                exporter,
                worker,
                status,
                events: events_rx,
                state: Mutex::new(ControllerState::Idle),
            }),
            threads: Mutex::new(Vec::new()),
        }
    }

    /// Current state
    pub fn state(&self) -> ControllerState {
        self.inner.state()
    }

    /// The shared measurement store
    pub fn store(&self) -> &Arc<MeasurementStore> {
        &self.inner.store
    }

    /// The worker's status flags
    pub fn worker_status(&self) -> Arc<WorkerStatus> {
        self.inner.status.clone()
    }

    /// Check if an instrument handle is installed and connected
    pub fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    /// Connect and launch the polling and worker threads
    ///
    /// An invalid sweep or a connection failure moves the controller to
    /// `Failed` and is returned; nothing else is started.
    pub fn start(&self) -> Result<()> {
        if self.state() != ControllerState::Idle {
            return Err(VnaError::Config(format!(
                "controller already started (state {})",
                self.state()
            )));
        }

        if let Err(e) = self.inner.worker.sweep().validate() {
            tracing::error!("Invalid sweep: {}", e);
            self.inner.transition(ControllerState::Failed);
            return Err(e);
        }

        self.inner.transition(ControllerState::Connecting);
        if let Err(e) = self.inner.connect() {
            tracing::error!("Failed to connect to {}: {}", self.inner.port, e);
            self.inner.transition(ControllerState::Failed);
            return Err(e.into());
        }
        self.inner.transition(ControllerState::Running);

        let poll = {
            let inner = self.inner.clone();
            std::thread::Builder::new()
                .name("sweep-poll".to_string())
                .spawn(move || inner.poll_loop())?
        };
        let worker = {
            let inner = self.inner.clone();
            std::thread::Builder::new()
                .name("sweep-worker".to_string())
                .spawn(move || {
                    if !inner.sweep_start() {
                        inner.status.mark_finished();
                    }
                })?
        };

        self.lock_threads().extend([poll, worker]);
        Ok(())
    }

    /// Run the worker on the calling thread
    ///
    /// Clears any earlier stop request. Returns `false` without doing
    /// anything if the instrument is not connected.
    pub fn sweep_start(&self) -> bool {
        self.inner.status.clear_stop();
        self.inner.sweep_start()
    }

    /// Ask the worker to stop; it finishes at its next opportunity
    pub fn sweep_stop(&self) {
        tracing::debug!("Stop requested");
        self.inner.status.request_stop();
    }

    /// Wait for the polling and worker threads to exit
    pub fn wait(&self) {
        let threads: Vec<_> = self.lock_threads().drain(..).collect();
        for handle in threads {
            let name = handle.thread().name().unwrap_or("unnamed").to_string();
            if handle.join().is_err() {
                tracing::error!("Thread {} panicked", name);
            }
        }
    }

    /// Stop the worker, wait for both threads and close the session
    pub fn shutdown(&self) {
        self.sweep_stop();
        self.wait();
        if let Some(session) = self.inner.session().as_ref() {
            self.inner.sessions.close(session);
        }
        *self
            .inner
            .instrument
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn lock_threads(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.threads.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ControllerInner {
    fn state(&self) -> ControllerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, to: ControllerState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != to {
            tracing::debug!("Controller {} -> {}", *state, to);
            *state = to;
        }
    }

    fn session(&self) -> MutexGuard<'_, Option<DeviceSession>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_instrument(&self, handle: Option<crate::backend::instrument::InstrumentHandle>) {
        *self
            .instrument
            .write()
            .unwrap_or_else(PoisonError::into_inner) = handle;
    }

    fn is_connected(&self) -> bool {
        self.instrument
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| handle.connected())
    }

    fn connect(&self) -> std::result::Result<(), ConnectError> {
        let session = self.sessions.open(&self.port)?;
        match self.sessions.establish_instrument(&session) {
            Ok(handle) => {
                self.set_instrument(Some(handle));
                *self.session() = Some(session);
                Ok(())
            }
            Err(e) => {
                self.sessions.close(&session);
                Err(e)
            }
        }
    }

    fn sweep_start(&self) -> bool {
        if !self.is_connected() {
            tracing::warn!("Instrument not connected, sweep not started");
            return false;
        }
        tracing::debug!("Starting sweep worker");
        self.worker.run();
        true
    }

    fn poll_loop(&self) {
        tracing::info!("Starting poll loop ({:?} interval)", self.poll_interval);
        let mut last_update = Instant::now();
        let mut stalled = false;

        loop {
            match self.events.recv_timeout(self.poll_interval) {
                Ok(event) => self.handle_event(event),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => std::thread::sleep(self.poll_interval),
            }
            self.handle_sweep_errors();

            if self.status.take_updated() {
                self.handle_update();
                last_update = Instant::now();
                stalled = false;
            }

            if self.status.is_finished() {
                // finished is set after the last save; pick up anything still pending
                for event in self.events.try_iter() {
                    self.handle_event(event);
                }
                self.handle_sweep_errors();
                if self.status.take_updated() {
                    self.handle_update();
                }
                self.transition(ControllerState::Finished);
                tracing::info!("Worker finished, poll loop exiting");
                return;
            }

            if let Some(limit) = self.watchdog {
                if !stalled && last_update.elapsed() > limit {
                    tracing::warn!("No sweep completed in the last {:?}", limit);
                    stalled = true;
                }
            }
        }
    }

    fn handle_event(&self, event: WorkerEvent) {
        match event {
            WorkerEvent::SweepError(message) => {
                tracing::trace!("Worker reported sweep error: {}", message);
            }
            WorkerEvent::Updated { generation } => {
                tracing::trace!("Worker reported sweep {}", generation);
            }
            WorkerEvent::Finished => {}
        }
    }

    fn handle_update(&self) {
        self.transition(ControllerState::Updating);

        let snapshot = self.store.snapshot_with_source();
        let summary = compute_summary(&snapshot.s11, &snapshot.s21);
        tracing::info!("Sweep {} updated: {}", snapshot.generation, summary);

        if let Some(path) = self.exporter.export_on_update(&snapshot.s11, &snapshot.s21) {
            tracing::info!("Exported {}", path.display());
        }

        self.transition(ControllerState::Running);
    }

    fn handle_sweep_errors(&self) {
        let errors = self.status.take_sweep_errors();
        if errors == 0 {
            return;
        }
        tracing::warn!(
            "{} sweep error(s), last: {}",
            errors,
            self.status.error_message().unwrap_or_default()
        );
        self.transition(ControllerState::Reconnecting);

        let result = match self.session().as_ref() {
            Some(session) => self.sessions.reconnect(session),
            None => Err(ConnectError::NotOpen {
                identifier: self.port.clone(),
            }),
        };
        match result {
            Ok(handle) => {
                tracing::info!("Reconnected to {}", handle.name());
                self.set_instrument(Some(handle));
            }
            Err(e) => {
                tracing::error!("Reconnect to {} failed: {}", self.port, e);
                self.set_instrument(None);
            }
        }

        self.transition(ControllerState::Running);
    }
}
