//! Configuration management.

mod settings;

pub use settings::{
    AppConfig, AppSettings, EngineSettings, ExchangeConfig, LoggingConfig,
};

use config::{Config, Environment, File};
use gridbot_core::error::StrategyError;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error(transparent)]
    Load(#[from] config::ConfigError),

    #[error("strategy '{id}': {source}")]
    Strategy { id: String, source: StrategyError },

    #[error("duplicate strategy id '{0}'")]
    DuplicateStrategyId(String),

    #[error("environment variable {0} is not set")]
    MissingCredential(String),
}

/// Load configuration from file and environment.
///
/// Environment variables prefixed `GRIDBOT` override file values, with
/// `__` as the section separator (e.g. `GRIDBOT__LOGGING__LEVEL=debug`).
pub fn load_config(path: &Path) -> Result<AppConfig, SettingsError> {
    let config = Config::builder()
        .add_source(File::from(path).required(true))
        .add_source(
            Environment::with_prefix("GRIDBOT")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let config: AppConfig = config.try_deserialize()?;
    validate(&config)?;
    Ok(config)
}

/// Validate a loaded configuration.
pub fn validate(config: &AppConfig) -> Result<(), SettingsError> {
    let mut seen = std::collections::HashSet::new();
    for strategy in &config.strategies {
        if !seen.insert(strategy.id.as_str()) {
            return Err(SettingsError::DuplicateStrategyId(strategy.id.clone()));
        }
        strategy
            .validate()
            .map_err(|source| SettingsError::Strategy {
                id: strategy.id.clone(),
                source,
            })?;
    }
    Ok(())
}

/// Resolve the API credentials named by the exchange config.
pub fn resolve_credentials(exchange: &ExchangeConfig) -> Result<(String, String), SettingsError> {
    let key = std::env::var(&exchange.api_key_env)
        .map_err(|_| SettingsError::MissingCredential(exchange.api_key_env.clone()))?;
    let secret = std::env::var(&exchange.api_secret_env)
        .map_err(|_| SettingsError::MissingCredential(exchange.api_secret_env.clone()))?;
    Ok((key, secret))
}
