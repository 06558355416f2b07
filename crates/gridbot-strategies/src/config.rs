//! Strategy configuration types.

use gridbot_core::error::StrategyError;
use gridbot_core::types::Timeframe;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// The closed set of strategy kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// RSI overbought/oversold on a single timeframe
    Rsi,
    /// RSI on a fast timeframe confirmed by a higher timeframe
    RsiMultiTimeframe,
    /// RSI gated by a volume surge over the volume EMA
    VolumeFilter,
    /// RSI + MACD + volume + candlestick pattern, all gates ANDed
    Advanced,
    /// Resting limit-order ladder; entries come from rung fills
    Grid,
    /// Time-driven fixed-amount accumulation
    Dca,
    /// User-submitted orders only
    Manual,
}

impl StrategyKind {
    /// Whether the kind produces indicator-driven signals.
    pub fn is_indicator_driven(&self) -> bool {
        matches!(
            self,
            StrategyKind::Rsi
                | StrategyKind::RsiMultiTimeframe
                | StrategyKind::VolumeFilter
                | StrategyKind::Advanced
        )
    }
}

/// Grid ladder parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridParams {
    /// Lower price bound
    pub lower: Decimal,
    /// Upper price bound
    pub upper: Decimal,
    /// Number of rungs
    pub levels: usize,
    /// Quote-asset investment committed to the ladder
    pub investment: Decimal,
    /// Fraction of investment allocated to the long ladder when hedging
    /// (the remainder goes short). None = plain one-sided grid.
    pub hedge_ratio: Option<Decimal>,
}

/// DCA parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DcaParams {
    /// Quote-asset amount bought per interval
    pub amount: Decimal,
    /// Hours between purchases
    pub interval_hours: u64,
}

/// One strategy instance: kind, symbol and every tunable parameter.
///
/// Treated as an immutable value per evaluation cycle; the UI replaces
/// the whole config on update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Unique instance id, e.g. "rsi-btc"
    pub id: String,
    pub kind: StrategyKind,
    /// Symbol to trade
    pub symbol: String,
    /// Primary evaluation timeframe
    pub timeframe: Timeframe,
    /// Confirmation timeframe for RSI_MTF
    pub higher_timeframe: Timeframe,
    /// RSI period
    pub rsi_period: usize,
    /// RSI long entry threshold
    pub oversold: f64,
    /// RSI short entry threshold
    pub overbought: f64,
    /// Higher-timeframe RSI midline for RSI_MTF confirmation
    pub trend_midline: f64,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    /// Volume must exceed multiplier x volume EMA for the filter to hold
    pub volume_multiplier: f64,
    /// Stop distance as a fraction of entry, e.g. 0.02 = 2%
    pub stop_loss_pct: Decimal,
    /// Take-profit distance as a fraction of entry
    pub take_profit_pct: Decimal,
    /// Trailing distance as a fraction of the favorable extreme
    pub trailing_pct: Decimal,
    /// Leverage for entries, 1 = spot-equivalent
    pub leverage: u32,
    /// Fraction of account balance risked per trade
    pub risk_pct: Decimal,
    /// Grid parameters (required for Grid)
    pub grid: Option<GridParams>,
    /// DCA parameters (required for Dca)
    pub dca: Option<DcaParams>,
    /// Disabled strategies are never evaluated
    pub enabled: bool,
}

impl StrategyConfig {
    /// A config with conventional defaults for the given kind and symbol.
    pub fn new(id: impl Into<String>, kind: StrategyKind, symbol: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            symbol: symbol.into(),
            timeframe: Timeframe::Minute5,
            higher_timeframe: Timeframe::Hour1,
            rsi_period: 14,
            oversold: 30.0,
            overbought: 70.0,
            trend_midline: 50.0,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            volume_multiplier: 1.5,
            stop_loss_pct: dec!(0.02),
            take_profit_pct: dec!(0.025),
            trailing_pct: dec!(0.01),
            leverage: 1,
            risk_pct: dec!(0.01),
            grid: None,
            dca: None,
            enabled: true,
        }
    }

    /// Validate the configuration.
    ///
    /// A config that fails validation leaves the strategy disabled; it is
    /// a load-time error, never a runtime panic.
    pub fn validate(&self) -> Result<(), StrategyError> {
        if self.id.is_empty() {
            return Err(StrategyError::InvalidConfig("strategy id is empty".into()));
        }
        if self.symbol.is_empty() {
            return Err(StrategyError::InvalidConfig("symbol is empty".into()));
        }
        if self.rsi_period < 2 {
            return Err(StrategyError::InvalidConfig(
                "RSI period must be at least 2".into(),
            ));
        }
        if self.overbought <= self.oversold {
            return Err(StrategyError::InvalidConfig(
                "overbought must be greater than oversold".into(),
            ));
        }
        if self.oversold < 0.0 || self.overbought > 100.0 {
            return Err(StrategyError::InvalidConfig(
                "RSI thresholds must be between 0 and 100".into(),
            ));
        }
        if self.macd_fast >= self.macd_slow {
            return Err(StrategyError::InvalidConfig(
                "MACD fast period must be less than slow period".into(),
            ));
        }
        if self.volume_multiplier <= 0.0 {
            return Err(StrategyError::InvalidConfig(
                "volume multiplier must be positive".into(),
            ));
        }
        if self.stop_loss_pct <= Decimal::ZERO || self.stop_loss_pct >= Decimal::ONE {
            return Err(StrategyError::InvalidConfig(
                "stop loss percent must be in (0, 1)".into(),
            ));
        }
        if self.take_profit_pct <= Decimal::ZERO || self.trailing_pct <= Decimal::ZERO {
            return Err(StrategyError::InvalidConfig(
                "take profit and trailing percents must be positive".into(),
            ));
        }
        if self.leverage == 0 {
            return Err(StrategyError::InvalidConfig(
                "leverage must be at least 1".into(),
            ));
        }
        if self.risk_pct <= Decimal::ZERO || self.risk_pct > Decimal::ONE {
            return Err(StrategyError::InvalidConfig(
                "risk percent must be in (0, 1]".into(),
            ));
        }

        match self.kind {
            StrategyKind::Grid => {
                let grid = self.grid.as_ref().ok_or_else(|| {
                    StrategyError::InvalidConfig("grid strategy requires grid parameters".into())
                })?;
                if grid.lower >= grid.upper {
                    return Err(StrategyError::InvalidConfig(
                        "grid lower bound must be below upper bound".into(),
                    ));
                }
                if grid.levels < 2 {
                    return Err(StrategyError::InvalidConfig(
                        "grid needs at least 2 levels".into(),
                    ));
                }
                if grid.investment <= Decimal::ZERO {
                    return Err(StrategyError::InvalidConfig(
                        "grid investment must be positive".into(),
                    ));
                }
                if let Some(ratio) = grid.hedge_ratio {
                    if ratio <= Decimal::ZERO || ratio >= Decimal::ONE {
                        return Err(StrategyError::InvalidConfig(
                            "hedge ratio must be in (0, 1)".into(),
                        ));
                    }
                }
            }
            StrategyKind::Dca => {
                let dca = self.dca.as_ref().ok_or_else(|| {
                    StrategyError::InvalidConfig("DCA strategy requires DCA parameters".into())
                })?;
                if dca.amount <= Decimal::ZERO {
                    return Err(StrategyError::InvalidConfig(
                        "DCA amount must be positive".into(),
                    ));
                }
                if dca.interval_hours == 0 {
                    return Err(StrategyError::InvalidConfig(
                        "DCA interval must be at least 1 hour".into(),
                    ));
                }
            }
            _ => {}
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = StrategyConfig::new("rsi-btc", StrategyKind::Rsi, "BTC_USDT");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_contradictory_thresholds() {
        let mut config = StrategyConfig::new("rsi-btc", StrategyKind::Rsi, "BTC_USDT");
        config.oversold = 70.0;
        config.overbought = 30.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_grid_requires_params() {
        let config = StrategyConfig::new("grid-btc", StrategyKind::Grid, "BTC_USDT");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_degenerate_grid_bounds() {
        let mut config = StrategyConfig::new("grid-btc", StrategyKind::Grid, "BTC_USDT");
        config.grid = Some(GridParams {
            lower: dec!(31000),
            upper: dec!(29000),
            levels: 10,
            investment: dec!(1000),
            hedge_ratio: None,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_single_level_grid_rejected() {
        let mut config = StrategyConfig::new("grid-btc", StrategyKind::Grid, "BTC_USDT");
        config.grid = Some(GridParams {
            lower: dec!(29000),
            upper: dec!(31000),
            levels: 1,
            investment: dec!(1000),
            hedge_ratio: None,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_dca_zero_interval_rejected() {
        let mut config = StrategyConfig::new("dca-btc", StrategyKind::Dca, "BTC_USDT");
        config.dca = Some(DcaParams {
            amount: dec!(100),
            interval_hours: 0,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_hedge_ratio_bounds() {
        let mut config = StrategyConfig::new("hedge-btc", StrategyKind::Grid, "BTC_USDT");
        config.grid = Some(GridParams {
            lower: dec!(29000),
            upper: dec!(31000),
            levels: 10,
            investment: dec!(1000),
            hedge_ratio: Some(dec!(1.2)),
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_leverage_rejected() {
        let mut config = StrategyConfig::new("rsi-btc", StrategyKind::Rsi, "BTC_USDT");
        config.leverage = 0;
        assert!(config.validate().is_err());
    }
}
