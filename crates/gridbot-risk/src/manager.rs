//! The gate between signals and order requests.

use gridbot_core::types::{Account, Direction, OrderRequest, Position, Side, Signal};
use gridbot_strategies::{StrategyConfig, StrategyKind};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::liquidation::LiquidationMonitor;
use crate::sizing::{DynamicLimits, PositionSizer};
use crate::stops::compute_stop_levels;

/// Global risk settings, independent of any one strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskSettings {
    /// Maximum notional value of a single position
    pub max_position_notional: Decimal,
    /// Hard cap on concurrent open positions, on top of the
    /// balance-derived limit
    pub max_concurrent_positions: usize,
    /// Required distance (fraction of entry) between the stop-loss and
    /// the estimated liquidation price
    pub liq_safety_pct: Decimal,
}

impl Default for RiskSettings {
    fn default() -> Self {
        Self {
            max_position_notional: dec!(100000),
            max_concurrent_positions: 10,
            liq_safety_pct: dec!(0.005),
        }
    }
}

/// Protective levels that accompany every approved entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopLevels {
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    /// Trailing distance, applied once the take-profit level is touched
    pub trailing_pct: Decimal,
}

/// Outcome of risk evaluation.
///
/// An approved entry always carries its stop levels; there is no variant
/// for an entry without protection.
#[derive(Debug, Clone)]
pub enum RiskDecision {
    Approved {
        order: OrderRequest,
        stops: StopLevels,
    },
    Rejected {
        reason: String,
    },
}

impl RiskDecision {
    fn rejected(reason: impl Into<String>) -> Self {
        RiskDecision::Rejected {
            reason: reason.into(),
        }
    }

    pub fn is_approved(&self) -> bool {
        matches!(self, RiskDecision::Approved { .. })
    }
}

/// Applies sizing, concurrency and liquidation-safety rules to signals.
#[derive(Debug, Clone)]
pub struct RiskManager {
    settings: RiskSettings,
    sizer: PositionSizer,
}

impl RiskManager {
    pub fn new(settings: RiskSettings) -> Self {
        let sizer = PositionSizer::new(settings.max_position_notional);
        Self { settings, sizer }
    }

    pub fn settings(&self) -> &RiskSettings {
        &self.settings
    }

    /// Evaluate an entry signal against the current account state.
    pub fn evaluate_signal(
        &self,
        account: &Account,
        config: &StrategyConfig,
        signal: &Signal,
        price: Decimal,
    ) -> RiskDecision {
        if !signal.direction.is_actionable() {
            return RiskDecision::rejected("signal is flat");
        }
        if price <= Decimal::ZERO {
            return RiskDecision::rejected("no valid mark price");
        }
        if account.has_position(&signal.symbol) {
            return RiskDecision::rejected(format!(
                "position already open in {}",
                signal.symbol
            ));
        }

        let limits = DynamicLimits::from_balance(account.balance);
        let max_positions = limits.max_positions.min(self.settings.max_concurrent_positions);
        if account.open_position_count() >= max_positions {
            return RiskDecision::rejected(format!(
                "at position limit ({} open, max {})",
                account.open_position_count(),
                max_positions
            ));
        }

        let side = match signal.direction {
            Direction::Long => Side::Buy,
            Direction::Short => Side::Sell,
            Direction::Flat => unreachable!("flat rejected above"),
        };

        let (stop_loss, take_profit) =
            compute_stop_levels(side, price, config.stop_loss_pct, config.take_profit_pct);

        // The stop must sit safely inside the liquidation price, or the
        // exchange would liquidate before the stop fires.
        let liquidation =
            LiquidationMonitor::estimate_liquidation_price(side, price, config.leverage);
        let safety = price * self.settings.liq_safety_pct;
        let stop_is_safe = match side {
            Side::Buy => stop_loss > liquidation + safety,
            Side::Sell => stop_loss < liquidation - safety,
        };
        if !stop_is_safe {
            return RiskDecision::rejected(format!(
                "stop {} inside liquidation band (liq {}, leverage {}x)",
                stop_loss, liquidation, config.leverage
            ));
        }

        let quantity = self.sizer.calculate(account, config.risk_pct, price, stop_loss);
        if quantity <= Decimal::ZERO {
            return RiskDecision::rejected("computed size is zero");
        }

        debug!(
            symbol = %signal.symbol,
            %side,
            %quantity,
            %stop_loss,
            %take_profit,
            "signal approved"
        );

        let order = OrderRequest::market(&signal.symbol, side, quantity)
            .with_leverage(config.leverage)
            .with_client_order_id(OrderRequest::generate_client_order_id(&config.id));

        RiskDecision::Approved {
            order,
            stops: StopLevels {
                stop_loss,
                take_profit,
                trailing_pct: config.trailing_pct,
            },
        }
    }

    /// Size a DCA purchase: a fixed quote amount at the current price.
    pub fn dca_order(&self, config: &StrategyConfig, price: Decimal) -> Option<OrderRequest> {
        if config.kind != StrategyKind::Dca || price <= Decimal::ZERO {
            return None;
        }
        let params = config.dca.as_ref()?;
        let quantity = params.amount / price;
        if quantity <= Decimal::ZERO {
            return None;
        }
        Some(
            OrderRequest::market(&config.symbol, Side::Buy, quantity)
                .with_client_order_id(OrderRequest::generate_client_order_id(&config.id)),
        )
    }

    /// Build the protective order requests for a filled position.
    ///
    /// Used both on entry and when stop repair finds a position without
    /// its stop-loss.
    pub fn protective_requests(
        &self,
        position: &Position,
        stops: &StopLevels,
    ) -> (OrderRequest, OrderRequest) {
        let exit_side = position.side.opposite();
        let stop = OrderRequest::stop(
            &position.symbol,
            exit_side,
            position.quantity,
            stops.stop_loss,
        );
        let take_profit = OrderRequest::take_profit(
            &position.symbol,
            exit_side,
            position.quantity,
            stops.take_profit,
        );
        (stop, take_profit)
    }
}

impl Default for RiskManager {
    fn default() -> Self {
        Self::new(RiskSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use gridbot_core::types::{Fill, SignalStrength};

    fn long_signal(symbol: &str) -> Signal {
        Signal::entry(symbol, Direction::Long, SignalStrength::Strong, 0.9, "test")
    }

    fn open_long(symbol: &str) -> Position {
        let mut position = Position::opening(symbol, Side::Buy, 1, "test");
        position.apply_fill(&Fill {
            id: "f1".into(),
            order_id: "o1".into(),
            symbol: symbol.into(),
            side: Side::Buy,
            quantity: dec!(1),
            price: dec!(30000),
            fee: Decimal::ZERO,
            sequence: 1,
            timestamp: Utc::now(),
        });
        position
    }

    #[test]
    fn test_flat_signal_rejected() {
        let manager = RiskManager::default();
        let account = Account::new(dec!(10000));
        let config = StrategyConfig::new("rsi-btc", StrategyKind::Rsi, "BTC_USDT");
        let signal = Signal::flat("BTC_USDT", "test");

        let decision = manager.evaluate_signal(&account, &config, &signal, dec!(30000));
        assert!(!decision.is_approved());
    }

    #[test]
    fn test_approved_entry_carries_stops() {
        let manager = RiskManager::default();
        let account = Account::new(dec!(10000));
        let config = StrategyConfig::new("rsi-btc", StrategyKind::Rsi, "BTC_USDT");

        match manager.evaluate_signal(&account, &config, &long_signal("BTC_USDT"), dec!(30000)) {
            RiskDecision::Approved { order, stops } => {
                assert_eq!(order.side, Side::Buy);
                assert!(order.client_order_id.starts_with("rsi-btc_"));
                // 2% stop, 2.5% target off the defaults.
                assert_eq!(stops.stop_loss, dec!(29400.0000));
                assert_eq!(stops.take_profit, dec!(30750.0000));
            }
            RiskDecision::Rejected { reason } => panic!("rejected: {reason}"),
        }
    }

    #[test]
    fn test_size_respects_notional_cap() {
        let manager = RiskManager::new(RiskSettings {
            max_position_notional: dec!(3000),
            ..RiskSettings::default()
        });
        let account = Account::new(dec!(1_000_000));
        let config = StrategyConfig::new("rsi-btc", StrategyKind::Rsi, "BTC_USDT");

        match manager.evaluate_signal(&account, &config, &long_signal("BTC_USDT"), dec!(30000)) {
            RiskDecision::Approved { order, .. } => {
                assert!(order.quantity * dec!(30000) <= dec!(3000));
            }
            RiskDecision::Rejected { reason } => panic!("rejected: {reason}"),
        }
    }

    #[test]
    fn test_existing_position_blocks_entry() {
        let manager = RiskManager::default();
        let mut account = Account::new(dec!(10000));
        account
            .positions
            .insert("BTC_USDT".into(), open_long("BTC_USDT"));
        let config = StrategyConfig::new("rsi-btc", StrategyKind::Rsi, "BTC_USDT");

        let decision =
            manager.evaluate_signal(&account, &config, &long_signal("BTC_USDT"), dec!(30000));
        assert!(!decision.is_approved());
    }

    #[test]
    fn test_concurrency_limit() {
        let manager = RiskManager::new(RiskSettings {
            max_concurrent_positions: 1,
            ..RiskSettings::default()
        });
        let mut account = Account::new(dec!(10000));
        account
            .positions
            .insert("ETH_USDT".into(), open_long("ETH_USDT"));
        let config = StrategyConfig::new("rsi-btc", StrategyKind::Rsi, "BTC_USDT");

        let decision =
            manager.evaluate_signal(&account, &config, &long_signal("BTC_USDT"), dec!(30000));
        assert!(!decision.is_approved());
    }

    #[test]
    fn test_stop_inside_liquidation_band_rejected() {
        let manager = RiskManager::default();
        let account = Account::new(dec!(10000));
        let mut config = StrategyConfig::new("rsi-btc", StrategyKind::Rsi, "BTC_USDT");
        // At 100x the liquidation price is 1% away but the stop is 2%
        // away; the exchange would liquidate first.
        config.leverage = 100;

        let decision =
            manager.evaluate_signal(&account, &config, &long_signal("BTC_USDT"), dec!(30000));
        assert!(!decision.is_approved());
    }

    #[test]
    fn test_protective_requests_are_reduce_only_exits() {
        let manager = RiskManager::default();
        let position = open_long("BTC_USDT");
        let stops = StopLevels {
            stop_loss: dec!(29400),
            take_profit: dec!(30750),
            trailing_pct: dec!(0.01),
        };

        let (stop, take_profit) = manager.protective_requests(&position, &stops);
        assert_eq!(stop.side, Side::Sell);
        assert!(stop.reduce_only);
        assert_eq!(stop.trigger_price, Some(dec!(29400)));
        assert_eq!(take_profit.side, Side::Sell);
        assert_eq!(take_profit.quantity, position.quantity);
    }

    #[test]
    fn test_dca_fixed_quote_amount() {
        let manager = RiskManager::default();
        let mut config = StrategyConfig::new("dca-btc", StrategyKind::Dca, "BTC_USDT");
        config.dca = Some(gridbot_strategies::DcaParams {
            amount: dec!(300),
            interval_hours: 24,
        });

        let order = manager.dca_order(&config, dec!(30000)).unwrap();
        assert_eq!(order.side, Side::Buy);
        assert_eq!(order.quantity, dec!(0.01));
    }
}
