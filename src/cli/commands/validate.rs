//! Validate configuration command.

use anyhow::Result;
use gridbot_config::load_config;
use std::path::Path;

pub async fn run(config_path: &Path) -> Result<()> {
    println!("Validating configuration: {}", config_path.display());

    match load_config(config_path) {
        Ok(config) => {
            println!("Configuration is valid!");
            println!();
            println!("App: {}", config.app.name);
            println!("Environment: {}", config.app.environment);
            println!("Log level: {}", config.logging.level);
            println!("Exchange: {}", config.exchange.base_url);
            println!("Max position notional: {}", config.risk.max_position_notional);
            println!("Max concurrent positions: {}", config.risk.max_concurrent_positions);
            println!("Strategies: {}", config.strategies.len());
            for strategy in &config.strategies {
                let status = if strategy.enabled { "enabled" } else { "disabled" };
                println!("  {} on {} ({status})", strategy.id, strategy.symbol);
            }
        }
        Err(e) => {
            println!("Configuration error: {}", e);
            return Err(e.into());
        }
    }

    Ok(())
}
