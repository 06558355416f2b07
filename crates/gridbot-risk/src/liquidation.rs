//! Liquidation price estimation and proximity monitoring.

use gridbot_core::types::{Position, Side};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Severity of liquidation proximity, by distance from mark price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskGrade {
    Low,
    /// Within 20% of the liquidation price
    Medium,
    /// Within 10% of the liquidation price
    High,
    /// Within 5% of the liquidation price
    Critical,
}

/// Emitted when a position drifts toward its liquidation price.
#[derive(Debug, Clone, PartialEq)]
pub enum RiskEvent {
    /// Position is close enough to warrant attention
    LiquidationWarning {
        symbol: String,
        grade: RiskGrade,
        distance_pct: Decimal,
        liquidation_price: Decimal,
    },
    /// Position must be partially closed to restore margin headroom
    DeRisk {
        symbol: String,
        close_quantity: Decimal,
        liquidation_price: Decimal,
    },
}

/// Distance thresholds (percent of mark price) for grading and de-risking.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LiquidationThresholds {
    /// Distance below which a warning is emitted
    pub warning_pct: Decimal,
    /// Distance below which a partial close is requested
    pub emergency_pct: Decimal,
    /// Fraction of the position closed on emergency
    pub close_fraction: Decimal,
}

impl Default for LiquidationThresholds {
    fn default() -> Self {
        Self {
            warning_pct: dec!(20),
            emergency_pct: dec!(5),
            close_fraction: dec!(0.5),
        }
    }
}

/// Watches open positions against their estimated liquidation prices.
#[derive(Debug, Clone, Default)]
pub struct LiquidationMonitor {
    thresholds: LiquidationThresholds,
}

impl LiquidationMonitor {
    pub fn new(thresholds: LiquidationThresholds) -> Self {
        Self { thresholds }
    }

    /// Estimated isolated-margin liquidation price.
    ///
    /// Longs liquidate when price falls by the margin fraction, shorts
    /// when it rises: entry * (1 -/+ 1/leverage).
    pub fn estimate_liquidation_price(side: Side, entry: Decimal, leverage: u32) -> Decimal {
        let margin_fraction = Decimal::ONE / Decimal::from(leverage.max(1));
        match side {
            Side::Buy => entry * (Decimal::ONE - margin_fraction),
            Side::Sell => entry * (Decimal::ONE + margin_fraction),
        }
    }

    /// Distance from mark to liquidation, as a percent of mark price.
    /// Negative when the mark has already crossed the liquidation price.
    pub fn distance_pct(side: Side, mark: Decimal, liquidation: Decimal) -> Decimal {
        if mark <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        match side {
            Side::Buy => (mark - liquidation) / mark * dec!(100),
            Side::Sell => (liquidation - mark) / mark * dec!(100),
        }
    }

    /// Grade a distance.
    pub fn grade(distance_pct: Decimal) -> RiskGrade {
        if distance_pct < dec!(5) {
            RiskGrade::Critical
        } else if distance_pct < dec!(10) {
            RiskGrade::High
        } else if distance_pct < dec!(20) {
            RiskGrade::Medium
        } else {
            RiskGrade::Low
        }
    }

    /// Check one position against the thresholds.
    pub fn check(&self, position: &Position) -> Option<RiskEvent> {
        if !position.is_open() || position.quantity <= Decimal::ZERO {
            return None;
        }

        let liquidation = Self::estimate_liquidation_price(
            position.side,
            position.entry_price,
            position.leverage,
        );
        let distance = Self::distance_pct(position.side, position.mark_price, liquidation);
        let grade = Self::grade(distance);

        if distance < self.thresholds.emergency_pct {
            warn!(
                symbol = %position.symbol,
                %distance,
                %liquidation,
                "position within emergency distance of liquidation, de-risking"
            );
            return Some(RiskEvent::DeRisk {
                symbol: position.symbol.clone(),
                close_quantity: position.quantity * self.thresholds.close_fraction,
                liquidation_price: liquidation,
            });
        }

        if distance < self.thresholds.warning_pct {
            warn!(
                symbol = %position.symbol,
                ?grade,
                %distance,
                "position approaching liquidation"
            );
            return Some(RiskEvent::LiquidationWarning {
                symbol: position.symbol.clone(),
                grade,
                distance_pct: distance,
                liquidation_price: liquidation,
            });
        }

        None
    }
}
