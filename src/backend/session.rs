//! Device session manager
//!
//! Owns the transport handle and the logical instrument session. Every
//! open, close and reconnect runs under the session's transport mutex, so
//! none of them can interleave with an instrument command issued by the
//! worker or with each other.
//!
//! The manager makes exactly one attempt per call. Retrying is up to the
//! caller: the controller treats a failure in [`DeviceSessionManager::open`]
//! as fatal and a failure in [`DeviceSessionManager::reconnect`] as
//! recoverable.

use crate::backend::instrument::{InstrumentDriver, InstrumentHandle};
use crate::backend::transport::{SharedTransport, Transport, TransportFactory, DEFAULT_READ_TIMEOUT};
use crate::error::ConnectError;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Default pause between opening the port and talking to the instrument
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(100);

/// An open (or once-open) link to an instrument
pub struct DeviceSession {
    identifier: String,
    transport: SharedTransport,
    read_timeout: Duration,
}

impl DeviceSession {
    /// Wrap a transport in a session
    pub fn new(transport: Box<dyn Transport>, read_timeout: Duration) -> Self {
        Self {
            identifier: transport.identifier(),
            transport: Arc::new(Mutex::new(transport)),
            read_timeout,
        }
    }

    /// Transport identifier
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Read timeout the transport is opened with
    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// Check if the transport is open
    pub fn is_open(&self) -> bool {
        self.guard().is_open()
    }

    /// Shared handle to the guarded transport
    pub fn transport(&self) -> SharedTransport {
        self.transport.clone()
    }

    /// Take the session guard
    ///
    /// A poisoned guard is recovered: the transport holds no invariants a
    /// panicking holder could have broken beyond its open/closed state,
    /// which callers re-check.
    fn guard(&self) -> MutexGuard<'_, Box<dyn Transport>> {
        self.transport.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("identifier", &self.identifier)
            .field("read_timeout", &self.read_timeout)
            .finish()
    }
}

/// Opens, closes and re-establishes device sessions
pub struct DeviceSessionManager {
    factory: Arc<dyn TransportFactory>,
    driver: Arc<dyn InstrumentDriver>,
    read_timeout: Duration,
    settle_delay: Duration,
}

impl DeviceSessionManager {
    /// Create a manager with the default read timeout and settle delay
    pub fn new(factory: Arc<dyn TransportFactory>, driver: Arc<dyn InstrumentDriver>) -> Self {
        Self {
            factory,
            driver,
            read_timeout: DEFAULT_READ_TIMEOUT,
            settle_delay: DEFAULT_SETTLE_DELAY,
        }
    }

    /// Override the read timeout
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Override the settle delay
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Open a transport and wrap it in a session
    pub fn open(&self, identifier: &str) -> Result<DeviceSession, ConnectError> {
        let session = DeviceSession::new(self.factory.create(identifier), self.read_timeout);
        {
            let mut transport = session.guard();
            Self::open_transport(&mut **transport, self.read_timeout)?;
        }
        Ok(session)
    }

    /// Attach to the instrument and confirm it answers
    ///
    /// No handle is returned unless the instrument reported a frequency span.
    pub fn establish_instrument(
        &self,
        session: &DeviceSession,
    ) -> Result<InstrumentHandle, ConnectError> {
        if !self.settle_delay.is_zero() {
            std::thread::sleep(self.settle_delay);
        }

        let handle = self.driver.attach(session.transport()).map_err(|e| {
            tracing::error!("Unable to connect to VNA on {}: {}", session.identifier(), e);
            e
        })?;

        match handle.frequency_span() {
            Some((start, stop)) => {
                tracing::info!(
                    "Read starting frequency {} and end frequency {} from {}",
                    start,
                    stop,
                    handle.name()
                );
                Ok(handle)
            }
            None => {
                tracing::warn!("No frequencies read from {}", session.identifier());
                Err(ConnectError::ProtocolFailure {
                    identifier: session.identifier().to_string(),
                    reason: "no frequency data returned".to_string(),
                })
            }
        }
    }

    /// Close the session's transport
    ///
    /// Idempotent; never fails.
    pub fn close(&self, session: &DeviceSession) {
        let mut transport = session.guard();
        if transport.is_open() {
            tracing::info!("Closing connection to {}", session.identifier());
            transport.close();
        }
    }

    /// Flush unread input, re-open the transport and re-establish the instrument
    pub fn reconnect(&self, session: &DeviceSession) -> Result<InstrumentHandle, ConnectError> {
        {
            let mut transport = session.guard();
            tracing::info!("Reconnecting to {}", session.identifier());
            if let Err(e) = transport.flush_buffers() {
                tracing::warn!("Failed to flush {}: {}", session.identifier(), e);
            }
            transport.close();
            Self::open_transport(&mut **transport, session.read_timeout())?;
        }
        self.establish_instrument(session)
    }

    fn open_transport(transport: &mut dyn Transport, timeout: Duration) -> Result<(), ConnectError> {
        let identifier = transport.identifier();
        tracing::info!("Connection {}", identifier);

        if let Err(e) = transport.open(timeout) {
            tracing::error!("Tried to open {} and failed: {}", identifier, e);
            return Err(ConnectError::OpenFailed {
                identifier,
                reason: e.to_string(),
            });
        }
        if !transport.is_open() {
            tracing::error!("Unable to open port {}", identifier);
            return Err(ConnectError::NotOpen { identifier });
        }
        Ok(())
    }
}
