//! Test data builders for creating test objects

use super::mock_helpers::simulated_manager;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use vnasaver_rs::backend::{
    ControllerSettings, SimulatedDriver, SimulatedTransportFactory, SweepSessionController,
};
use vnasaver_rs::export::{ExportScheduler, PortCount};
use vnasaver_rs::store::MeasurementStore;
use vnasaver_rs::types::{Datapoint, SweepConfig, SweepMode};

/// Builder for creating test sweeps
pub struct SweepBuilder {
    config: SweepConfig,
}

impl SweepBuilder {
    pub fn new() -> Self {
        Self {
            config: SweepConfig::new(1_000_000, 30_000_000, SweepMode::Single),
        }
    }

    pub fn range(mut self, start: u64, stop: u64) -> Self {
        self.config.start = start;
        self.config.stop = stop;
        self
    }

    pub fn points(mut self, points: usize) -> Self {
        self.config.points = points;
        self
    }

    pub fn segments(mut self, segments: u32) -> Self {
        self.config.segments = segments;
        self
    }

    pub fn continuous(mut self) -> Self {
        self.config.mode = SweepMode::Continuous;
        self
    }

    pub fn build(self) -> SweepConfig {
        self.config
    }
}

/// A controller wired to simulated hardware, plus the handles to inspect it
pub struct ControllerHarness {
    pub controller: SweepSessionController,
    pub factory: SimulatedTransportFactory,
    pub driver: SimulatedDriver,
    pub store: Arc<MeasurementStore>,
    pub output: TempDir,
}

/// Builder for [`ControllerHarness`]
pub struct ControllerBuilder {
    sweep: SweepConfig,
    ports: PortCount,
    max_consecutive_errors: u32,
    error_backoff: Duration,
    watchdog: Option<Duration>,
}

impl ControllerBuilder {
    pub fn new() -> Self {
        Self {
            sweep: SweepBuilder::new().points(11).build(),
            ports: PortCount::Two,
            max_consecutive_errors: 5,
            error_backoff: Duration::from_millis(10),
            watchdog: None,
        }
    }

    pub fn sweep(mut self, sweep: SweepConfig) -> Self {
        self.sweep = sweep;
        self
    }

    pub fn ports(mut self, ports: PortCount) -> Self {
        self.ports = ports;
        self
    }

    pub fn max_consecutive_errors(mut self, max: u32) -> Self {
        self.max_consecutive_errors = max;
        self
    }

    pub fn error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }

    pub fn watchdog(mut self, limit: Duration) -> Self {
        self.watchdog = Some(limit);
        self
    }

    pub fn build(self) -> ControllerHarness {
        let (sessions, factory, driver) = simulated_manager();
        let output = tempfile::tempdir().expect("create output dir");
        let store = Arc::new(MeasurementStore::default());

        let mut settings = ControllerSettings::new("sim0", self.sweep);
        settings.poll_interval = Duration::from_millis(10);
        settings.error_backoff = self.error_backoff;
        settings.max_consecutive_errors = self.max_consecutive_errors;
        settings.watchdog = self.watchdog;

        let controller = SweepSessionController::new(
            settings,
            sessions,
            store.clone(),
            ExportScheduler::new(output.path(), self.ports),
        );

        ControllerHarness {
            controller,
            factory,
            driver,
            store,
            output,
        }
    }
}

/// Buffer of `len` points whose frequencies all encode `tag`
pub fn tagged_buffer(tag: u64, len: usize) -> Vec<Datapoint> {
    (0..len as u64)
        .map(|i| Datapoint::new(tag * 1_000_000 + i, tag as f64, -(tag as f64)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sweep_builder() {
        let sweep = SweepBuilder::new()
            .range(2_000_000, 4_000_000)
            .points(21)
            .segments(3)
            .continuous()
            .build();

        assert_eq!(sweep.start, 2_000_000);
        assert_eq!(sweep.stop, 4_000_000);
        assert_eq!(sweep.total_points(), 63);
        assert!(sweep.is_continuous());
    }
}
