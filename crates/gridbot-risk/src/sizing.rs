//! Position sizing.

use gridbot_core::types::Account;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Risk-based position sizer.
///
/// Size is derived from the capital risked per trade and the stop
/// distance: quantity = (balance x risk_pct) / stop_distance, then capped
/// by the maximum position notional.
#[derive(Debug, Clone)]
pub struct PositionSizer {
    max_position_notional: Decimal,
}

impl PositionSizer {
    /// Create a sizer with the given notional cap per position.
    pub fn new(max_position_notional: Decimal) -> Self {
        Self {
            max_position_notional,
        }
    }

    /// Compute the quantity for an entry at `price` with a stop at
    /// `stop_price`, risking `risk_pct` of the free balance.
    ///
    /// Returns zero when the inputs are degenerate; callers reject
    /// zero-size orders.
    pub fn calculate(
        &self,
        account: &Account,
        risk_pct: Decimal,
        price: Decimal,
        stop_price: Decimal,
    ) -> Decimal {
        if price <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        let stop_distance = (price - stop_price).abs();
        if stop_distance <= Decimal::ZERO {
            return Decimal::ZERO;
        }

        let risk_amount = account.balance * risk_pct;
        let quantity = risk_amount / stop_distance;

        // Cap by notional.
        let max_quantity = self.max_position_notional / price;
        quantity.min(max_quantity)
    }

    /// The configured notional cap.
    pub fn max_position_notional(&self) -> Decimal {
        self.max_position_notional
    }
}

/// Account-derived limits, recomputed from the live balance.
///
/// One concurrent position per $100 of balance, at most 80% of balance
/// committed to ladders, one grid per $50.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicLimits {
    /// Maximum concurrent open positions
    pub max_positions: usize,
    /// Maximum quote-asset investment across ladders
    pub max_investment: Decimal,
    /// Maximum simultaneous grid ladders
    pub max_grids: usize,
}

impl DynamicLimits {
    /// Derive limits from the current free balance.
    pub fn from_balance(balance: Decimal) -> Self {
        let per_position = dec!(100);
        let per_grid = dec!(50);

        let max_positions = (balance / per_position).floor().to_usize().unwrap_or(0).max(1);
        let max_grids = (balance / per_grid).floor().to_usize().unwrap_or(0).max(1);

        Self {
            max_positions,
            max_investment: balance * dec!(0.8),
            max_grids,
        }
    }
}
