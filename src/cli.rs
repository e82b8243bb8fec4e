//! CLI definition using clap.

use std::path::PathBuf;

use clap::Parser;

/// fleetkeeperd - reconciliation bookkeeper daemon
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "fleetkeeperd")]
#[command(version)]
#[command(about = "Watches reconciliation runs, reaps orphaned operations and records cluster status")]
pub struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, default_value = "fleetkeeper.toml")]
    pub config: PathBuf,

    /// Create tables and indexes before starting
    #[arg(long, default_value_t = false)]
    pub init_schema: bool,
}
