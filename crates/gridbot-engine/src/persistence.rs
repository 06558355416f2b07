//! Persistence seam.
//!
//! The engine never blocks on storage: archives and snapshots are
//! fire-and-forget, and a store failure is logged, not propagated into
//! the trading path.

use async_trait::async_trait;
use gridbot_core::error::EngineError;
use gridbot_core::types::Position;
use gridbot_strategies::StrategyConfig;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::events::PortfolioSnapshot;

/// Storage backend for configs, closed trades and snapshots.
#[async_trait]
pub trait TradeStore: Send + Sync {
    /// Load the strategy definitions.
    async fn load_configs(&self) -> Result<Vec<StrategyConfig>, EngineError>;

    /// Append a closed position to the trade archive.
    async fn append_trade(&self, position: &Position) -> Result<(), EngineError>;

    /// Write a portfolio snapshot.
    async fn write_snapshot(&self, snapshot: &PortfolioSnapshot) -> Result<(), EngineError>;
}

/// File-backed store: configs from a JSON file, trades and snapshots
/// appended as JSON lines.
pub struct JsonFileStore {
    configs_path: PathBuf,
    trades: Mutex<std::fs::File>,
    snapshots: Mutex<std::fs::File>,
}

impl JsonFileStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, EngineError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        let open_append = |name: &str| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(dir.join(name))
        };

        Ok(Self {
            configs_path: dir.join("strategies.json"),
            trades: Mutex::new(open_append("trades.jsonl")?),
            snapshots: Mutex::new(open_append("snapshots.jsonl")?),
        })
    }

    fn append_line<T: serde::Serialize>(
        file: &Mutex<std::fs::File>,
        value: &T,
    ) -> Result<(), EngineError> {
        let line = serde_json::to_string(value)
            .map_err(|e| EngineError::Serialization(e.to_string()))?;
        let mut file = file
            .lock()
            .map_err(|_| EngineError::Internal("store lock poisoned".into()))?;
        writeln!(file, "{}", line)?;
        Ok(())
    }
}

#[async_trait]
impl TradeStore for JsonFileStore {
    async fn load_configs(&self) -> Result<Vec<StrategyConfig>, EngineError> {
        if !self.configs_path.exists() {
            return Ok(Vec::new());
        }
        let text = std::fs::read_to_string(&self.configs_path)?;
        serde_json::from_str(&text).map_err(|e| EngineError::Serialization(e.to_string()))
    }

    async fn append_trade(&self, position: &Position) -> Result<(), EngineError> {
        Self::append_line(&self.trades, position)
    }

    async fn write_snapshot(&self, snapshot: &PortfolioSnapshot) -> Result<(), EngineError> {
        Self::append_line(&self.snapshots, snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("gridbot-store-{name}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[tokio::test]
    async fn test_missing_configs_is_empty() {
        let store = JsonFileStore::open(temp_dir("empty")).unwrap();
        assert!(store.load_configs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_configs_round_trip() {
        use gridbot_strategies::StrategyKind;

        let dir = temp_dir("configs");
        let store = JsonFileStore::open(&dir).unwrap();

        let configs = vec![StrategyConfig::new("rsi-btc", StrategyKind::Rsi, "BTC_USDT")];
        std::fs::write(
            dir.join("strategies.json"),
            serde_json::to_string(&configs).unwrap(),
        )
        .unwrap();

        let loaded = store.load_configs().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, "rsi-btc");
    }
}
