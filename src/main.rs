//! Gridbot CLI application.

mod cli;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use gridbot_monitor::setup_logging;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // The guard flushes buffered file output on drop.
    let _log_guard = setup_logging(cli.log_level.as_str(), cli.json_logs, cli.log_file.as_deref());

    match cli.command {
        Commands::Live(args) => cli::commands::live::run(args, &cli.config).await,
        Commands::Paper(args) => cli::commands::paper::run(args, &cli.config).await,
        Commands::Strategies => cli::commands::strategies::run().await,
        Commands::ValidateConfig => cli::commands::validate::run(&cli.config).await,
    }
}
