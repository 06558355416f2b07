//! CLI definitions.

pub mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "gridbot")]
#[command(author, version, about = "Crypto signal evaluation and order execution engine")]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config/default.toml")]
    pub config: PathBuf,

    /// Log level
    #[arg(short, long, default_value = "info")]
    pub log_level: LogLevel,

    /// Enable JSON log format
    #[arg(long)]
    pub json_logs: bool,

    /// Also write logs to this file (daily rotation)
    #[arg(long)]
    pub log_file: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start live trading
    Live(LiveArgs),
    /// Start paper trading against live market data
    Paper(PaperArgs),
    /// List strategy kinds
    Strategies,
    /// Validate configuration
    ValidateConfig,
}

#[derive(clap::Args)]
pub struct LiveArgs {
    /// Cancel every resting order on shutdown, including stops
    #[arg(long)]
    pub cancel_all_on_exit: bool,
}

#[derive(clap::Args)]
pub struct PaperArgs {
    /// Starting balance; overrides the configured paper balance
    #[arg(long)]
    pub balance: Option<f64>,

    /// Seed candle history from CSV files named SYMBOL_TIMEFRAME.csv in
    /// this directory instead of fetching it over REST
    #[arg(long, value_name = "DIR")]
    pub replay_dir: Option<PathBuf>,
}
