//! # fleetkeeperd
//!
//! Startup sequence:
//!
//! 1. **Configuration** - Load the TOML file named by `--config`
//! 2. **Store** - Connect to SurrealDB, verify health, optionally create the schema
//! 3. **Bookkeeper** - Tick until SIGTERM/SIGINT, then stop between ticks

#![forbid(unsafe_code)]
#![forbid(clippy::unwrap_used)]
#![forbid(clippy::panic)]
#![deny(clippy::expect_used)]

use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use fleetkeeper::cli::Cli;
use fleetkeeper::daemon::{Daemon, shutdown_signal};
use fleetkeeper_scheduler::{AppConfig, stop_channel};

#[tokio::main]
async fn main() -> Result<()> {
    let start_time = Instant::now();
    let cli = Cli::parse();

    init_tracing();
    info!("fleetkeeperd starting...");

    let config = AppConfig::load(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    let daemon = Daemon::connect(&config, cli.init_schema).await?;

    let (handle, signal) = stop_channel();
    tokio::spawn(async move {
        shutdown_signal().await;
        handle.stop();
    });

    info!(
        startup_ms = start_time.elapsed().as_millis(),
        "fleetkeeperd ready"
    );
    daemon.run(signal).await?;

    info!("fleetkeeperd stopped");
    Ok(())
}

/// Install the global tracing subscriber, `info` unless `RUST_LOG` says otherwise.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();
}
