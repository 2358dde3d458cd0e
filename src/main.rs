//! NanoVNA sweep saver - Main Entry Point
//!
//! Connects to a NanoVNA, sweeps once (or continuously with `--infinite`)
//! and writes each sweep to a timestamped Touchstone file.
//!
//! # Usage
//!
//! ```bash
//! vnasaver-rs -f 1000000 -t 30000000 -o captures/
//! vnasaver-rs --simulate -i -d
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};
use vnasaver_rs::{
    backend::{
        ControllerSettings, DeviceSessionManager, SimulatedDriver, SimulatedTransportFactory,
        SweepSessionController,
    },
    config::AppConfig,
    export::ExportScheduler,
    store::{compute_summary, MeasurementStore},
    types::SweepMode,
};

#[derive(Parser, Debug)]
#[command(name = "vnasaver-rs", version)]
#[command(about = "Save Touchstone files from a NanoVNA", long_about = None)]
struct Cli {
    /// Output folder for Touchstone files
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Start frequency in Hz
    #[arg(short = 'f', long)]
    start: Option<u64>,

    /// Stop frequency in Hz
    #[arg(short = 't', long)]
    stop: Option<u64>,

    /// Keep sweeping and saving until stopped, otherwise sweep once
    #[arg(short, long)]
    infinite: bool,

    /// Serial port; discovered by USB ID when omitted
    #[arg(short, long)]
    port: Option<String>,

    /// Configuration file (TOML or JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Attenuator in the S21 path, in dB
    #[arg(short, long)]
    attenuation: Option<f64>,

    /// Touchstone file to load as reference
    #[arg(short, long)]
    reference: Option<PathBuf>,

    /// Use a simulated instrument instead of a serial device
    #[arg(long)]
    simulate: bool,

    /// Set console log level to debug
    #[arg(short, long)]
    debug: bool,

    /// File to write debug logging output to
    #[arg(short = 'D', long)]
    debug_file: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_logging(cli.debug, cli.debug_file.as_deref())?;

    println!(
        "{} {} - save Touchstone files from a NanoVNA",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );
    tracing::info!("Startup...");

    let config = load_config(&cli)?;
    tracing::debug!("Effective configuration: {:?}", config);

    let (sessions, port) = build_sessions(&cli, &config)?;

    let store = Arc::new(MeasurementStore::new(
        config.calibration.s21_attenuation_db,
        config.sweep.name.clone(),
    ));
    if let Some(reference) = &cli.reference {
        store
            .load_reference_file(reference)
            .with_context(|| format!("Failed to load reference {}", reference.display()))?;
    }

    let mut settings = ControllerSettings::new(port, config.sweep.clone());
    settings.poll_interval = config.session.poll_interval();
    settings.watchdog = config.session.watchdog();
    settings.error_backoff = config.session.error_backoff();
    settings.max_consecutive_errors = config.session.max_consecutive_errors;

    let controller = SweepSessionController::new(
        settings,
        sessions,
        store.clone(),
        ExportScheduler::new(&config.export.output_dir, config.export.ports),
    );

    controller.start().context("Failed to start sweep session")?;
    controller.wait();
    controller.shutdown();

    let snapshot = store.snapshot_with_source();
    tracing::info!(
        "Session finished after {} sweeps: {}",
        snapshot.generation,
        compute_summary(&snapshot.s11, &snapshot.s21)
    );
    if let Some(error) = controller.worker_status().error_message() {
        tracing::warn!("Last sweep error: {}", error);
    }
    Ok(())
}

/// Console at WARN (DEBUG with `-d`, `RUST_LOG` overrides), optional file at DEBUG
fn init_logging(debug: bool, debug_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let console_level = if debug { "debug" } else { "warn" };
    let console = tracing_subscriber::fmt::layer().with_filter(
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(console_level)),
    );

    let (file_layer, guard) = match debug_file {
        Some(path) => {
            let file = std::fs::File::create(path)
                .with_context(|| format!("Failed to create debug file {}", path.display()))?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(EnvFilter::new("debug"));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file_layer)
        .init();
    Ok(guard)
}

/// Load the config file and apply command-line overrides
fn load_config(cli: &Cli) -> Result<AppConfig> {
    let mut config = match &cli.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::load_default()?,
    };

    if let Some(output) = &cli.output {
        config.export.output_dir = output.clone();
    }
    if let Some(start) = cli.start {
        config.sweep.start = start;
    }
    if let Some(stop) = cli.stop {
        config.sweep.stop = stop;
    }
    if cli.infinite {
        config.sweep.mode = SweepMode::Continuous;
    }
    if let Some(port) = &cli.port {
        config.transport.port = Some(port.clone());
    }
    if let Some(attenuation) = cli.attenuation {
        config.calibration.s21_attenuation_db = attenuation;
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Pick the transport and driver, and resolve the port to open
fn build_sessions(cli: &Cli, config: &AppConfig) -> Result<(DeviceSessionManager, String)> {
    if cli.simulate {
        let sessions = DeviceSessionManager::new(
            Arc::new(SimulatedTransportFactory::new()),
            Arc::new(SimulatedDriver::new()),
        )
        .with_settle_delay(std::time::Duration::ZERO);
        let port = config.transport.port.clone().unwrap_or_else(|| "sim0".to_string());
        return Ok((sessions, port));
    }

    serial_sessions(config)
}

#[cfg(feature = "serial")]
fn serial_sessions(config: &AppConfig) -> Result<(DeviceSessionManager, String)> {
    use vnasaver_rs::backend::{discover_ports, NanoVnaDriver, SerialTransportFactory};
    use vnasaver_rs::error::ConnectError;

    let port = match &config.transport.port {
        Some(port) => port.clone(),
        None => discover_ports()
            .into_iter()
            .next()
            .ok_or(ConnectError::NoDevice)?,
    };

    let sessions = DeviceSessionManager::new(
        Arc::new(SerialTransportFactory::new(config.transport.baud_rate)),
        Arc::new(NanoVnaDriver::default()),
    )
    .with_read_timeout(config.transport.read_timeout())
    .with_settle_delay(config.transport.settle_delay());
    Ok((sessions, port))
}

#[cfg(not(feature = "serial"))]
fn serial_sessions(_config: &AppConfig) -> Result<(DeviceSessionManager, String)> {
    anyhow::bail!("built without serial support; use --simulate")
}
