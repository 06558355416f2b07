//! Configuration structures.

use gridbot_risk::{LiquidationThresholds, RiskSettings};
use gridbot_strategies::StrategyConfig;
use serde::{Deserialize, Serialize};

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub risk: RiskSettings,
    #[serde(default)]
    pub liquidation: LiquidationThresholds,
    #[serde(default)]
    pub engine: EngineSettings,
    /// Strategy instances to run
    #[serde(default)]
    pub strategies: Vec<StrategyConfig>,
}

/// General app settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    pub name: String,
    pub environment: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            name: "gridbot".to_string(),
            environment: "development".to_string(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    /// "pretty" or "json"
    pub format: String,
    /// Optional log file; stdout only when absent
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file: None,
        }
    }
}

/// Exchange API configuration.
///
/// Credentials are named indirectly: the config holds the names of the
/// environment variables, never the secrets themselves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    pub api_key_env: String,
    pub api_secret_env: String,
    pub base_url: String,
    pub ws_url: String,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            api_key_env: "GRIDBOT_API_KEY".to_string(),
            api_secret_env: "GRIDBOT_API_SECRET".to_string(),
            base_url: "https://api.gridex.io".to_string(),
            ws_url: "wss://ws.gridex.io/stream".to_string(),
        }
    }
}

/// Engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Directory for trade archives and snapshots
    pub data_dir: String,
    /// Starting balance for paper trading
    pub paper_balance: rust_decimal::Decimal,
}

impl Default for EngineSettings {
    fn default() -> Self {
        use rust_decimal_macros::dec;
        Self {
            data_dir: "data".to_string(),
            paper_balance: dec!(10000),
        }
    }
}
