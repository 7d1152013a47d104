//! CLI interface for settle-latency
//!
//! Provides subcommands for:
//! - `run`: Monitor funding and capture feed latency around settlements
//! - `offset`: Measure the local clock offset against the exchange
//! - `config`: Show the effective configuration

mod offset;
mod run;

pub use offset::{OffsetArgs, OffsetReport};
pub use run::RunArgs;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "settle-latency")]
#[command(about = "Measures market-data feed latency around perpetual futures funding settlements")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Monitor funding rates and capture the next settlement
    Run(RunArgs),
    /// Measure the clock offset against the exchange server
    Offset(OffsetArgs),
    /// Show configuration
    Config,
}
