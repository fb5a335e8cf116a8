//! # Tempmon
//!
//! Poll a SEM710 temperature transmitter once and report the reading to
//! the monitoring server when it changed or an update is due.
//!
//! # Control Flow
//!
//! 1. **Initialization**
//!    - Load the TOML configuration (first argument, default `config/default.toml`)
//!    - Set up logging with tracing subscriber
//!    - Fetch the container's runtime specifications from the server
//!    - Open the serial connection to the instrument
//!
//! 2. **Cycle**
//!    - Send a read-process request and wait for the reply
//!    - Classify the temperature against the server's limits
//!    - Upload and store the reading if it should be reported
//!
//! 3. **Exit**
//!    - `0` on success, otherwise the code of the failing stage
//!      (1 config/local I/O, 2 serial open, 3 instrument read, 4 server)

use anyhow::{Context, Result};
use std::env;
use std::process::ExitCode;
use tracing::{debug, error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

use tempmon::config::{Config, LoggingConfig};
use tempmon::cycle::{run_cycle, CycleContext, CycleOutcome};
use tempmon::error::{TempmonError, EXIT_IO_ERROR};
use tempmon::serial::InstrumentSerial;
use tempmon::server::ServerClient;
use tempmon::store::JsonFileStore;
use tempmon::transaction::TransactionConfig;

/// Configuration used when no path is given on the command line
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// File name prefix of the daily log files
const LOG_FILE_PREFIX: &str = "tempmon.log";

#[tokio::main]
async fn main() -> ExitCode {
    let config_path = env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    let config = match Config::load(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path))
    {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return ExitCode::from(exit_code(&e));
        }
    };

    // Keep the guard alive so buffered file output is flushed on exit
    let _log_guard = init_logging(&config.logging);

    info!("Tempmon v{} starting...", env!("CARGO_PKG_VERSION"));

    match run(&config).await {
        Ok(CycleOutcome::Reported(record)) => {
            info!("Reading reported: {:.2} °C ({})", record.temperature, record.status);
            ExitCode::SUCCESS
        }
        Ok(CycleOutcome::Unchanged(reading)) => {
            info!("Reading unchanged: {:.2} °C ({})", reading.temperature, reading.status);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(exit_code(&e))
        }
    }
}

/// Fetch specifications, read the instrument and report
async fn run(config: &Config) -> Result<CycleOutcome> {
    let server = ServerClient::new(&config.server).context("Failed to create HTTP client")?;

    let specs = server.fetch_specifications().await.with_context(|| {
        format!(
            "Failed to fetch runtime specifications from {}",
            server.specifications_url()
        )
    })?;
    debug!(
        "Expected monitor: vendor {:#06x}, product {:#06x}",
        specs.monitor.vendor_id, specs.monitor.product_id
    );

    let serial = InstrumentSerial::open(&config.serial).context("Failed to open SEM710")?;
    info!("SEM710 serial port opened at: {}", serial.device_path());
    let mut link = serial.into_link();

    let store = JsonFileStore::new(&config.storage.readings_file);
    let uploader = server.uploader(&specs);
    let context = CycleContext::new(
        config.server.container.clone(),
        &specs,
        TransactionConfig::from(&config.transaction),
    );

    run_cycle(&mut link, &store, &uploader, &context)
        .await
        .context("Polling cycle failed")
}

/// Install the tracing subscriber
///
/// `RUST_LOG` overrides the configured level. When `log_dir` is set, output
/// also goes to a daily rolling file there.
fn init_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    if config.log_dir.is_empty() {
        tracing_subscriber::fmt().with_env_filter(filter).init();
        return None;
    }

    let file_appender = tracing_appender::rolling::daily(&config.log_dir, LOG_FILE_PREFIX);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(std::io::stdout.and(file_writer))
        .init();

    Some(guard)
}

/// Process exit code for a failed run
fn exit_code(error: &anyhow::Error) -> u8 {
    error
        .downcast_ref::<TempmonError>()
        .map_or(EXIT_IO_ERROR, TempmonError::exit_code)
}
