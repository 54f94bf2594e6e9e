//! # Ground Control
//!
//! Fly one vehicle through the scripted sequence and keep an audit log of it.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use ground_control::config::Config;
use ground_control::link::{self, VehicleLink};
use ground_control::log_sink::LogSink;
use ground_control::sequencer::PhaseSequencer;
use ground_control::telemetry::TelemetryCache;

/// Main entry point for the ground station
///
/// # Control Flow
///
/// 1. **Initialization**
///    - Load configuration from the path given as the first argument, or use defaults
///    - Set up console logging with tracing subscriber
///    - Open the audit log under the configured directory
///    - Connect to the vehicle and attach the telemetry cache
///
/// 2. **Flight**
///    - Run the phase sequencer to completion
///    - Ctrl+C cancels the current wait and ends the run in `Failed`
///
/// 3. **Shutdown**
///    - Drain the audit log to disk
///
/// # Errors
///
/// Returns error if:
/// - The configuration file cannot be read or is invalid
/// - No vehicle is discovered at the configured URL
/// - The flight sequence fails
///
/// # Examples
///
/// ```bash
/// cargo run --release -- config/default.toml
/// ```
#[tokio::main]
async fn main() -> Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => Config::load(&path)
            .with_context(|| format!("Failed to load config from {}", path))?,
        None => {
            let config = Config::default();
            config.validate()?;
            config
        }
    };

    // Console output is written from a background thread.
    let (console, _console_guard) = tracing_appender::non_blocking(std::io::stdout());
    tracing_subscriber::fmt()
        .with_writer(console)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log.console_level)),
        )
        .init();

    info!("Ground Control v{} starting...", env!("CARGO_PKG_VERSION"));

    let log = LogSink::open(&config.log.dir);
    match log.path() {
        Some(path) => info!("Audit log: {}", path.display()),
        None => warn!("Audit log disabled, records go to the console only"),
    }

    let link = match open_link(&config, &log).await {
        Ok(link) => link,
        Err(e) => {
            log.shutdown();
            return Err(e.into());
        }
    };

    let telemetry = Arc::new(TelemetryCache::new(log.clone()));
    telemetry.attach(link.as_ref());

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, aborting flight...");
            on_signal.cancel();
        }
    });

    let mut sequencer = PhaseSequencer::new(link, telemetry, log.clone(), &config, cancel);
    let result = sequencer.run().await;

    info!("Flight finished in phase {}", sequencer.phase());
    log.shutdown();
    if log.dropped() > 0 {
        warn!("{} audit records were not written", log.dropped());
    }

    if let Err(e) = &result {
        error!("Flight failed: {}", e);
    }
    result.map_err(Into::into)
}

/// Connect to the configured vehicle, recording the outcome in the audit log
async fn open_link(
    config: &Config,
    log: &LogSink,
) -> ground_control::error::Result<Arc<dyn VehicleLink>> {
    log.info(format!("Connecting to vehicle at {}", config.link.url));
    let discovery_timeout = config.link.discovery_timeout();
    match link::connect(&config.link.url, discovery_timeout, &config.sim).await {
        Ok(link) => {
            log.info(format!("Connected to vehicle at {}", config.link.url));
            Ok(Arc::from(link))
        }
        Err(e) => {
            log.error(format!("Connection failed: {}", e));
            Err(e)
        }
    }
}
