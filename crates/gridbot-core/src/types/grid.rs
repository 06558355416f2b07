//! Grid ladder types.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Side;
use crate::error::StrategyError;

/// State of a single grid rung.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RungState {
    /// No order placed yet
    Idle,
    /// Resting limit order working on the exchange
    Resting,
    /// Order filled, awaiting recycling
    Filled,
}

/// One price level of a grid ladder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridRung {
    /// Level index, 0 = lowest price
    pub index: usize,
    /// Limit price of the rung
    pub price: Decimal,
    /// Side of the resting order at this rung
    pub side: Side,
    /// Quantity per fill at this rung
    pub quantity: Decimal,
    /// Client order id of the resting order, if any
    pub client_order_id: Option<String>,
    /// Current state
    pub state: RungState,
}

/// An evenly spaced ladder of limit orders between two bounds.
///
/// Rungs below the reference price rest as buys, rungs above as sells.
/// A rung at exactly the reference price is left idle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridLadder {
    /// Symbol the ladder trades
    pub symbol: String,
    /// Lower price bound
    pub lower: Decimal,
    /// Upper price bound
    pub upper: Decimal,
    /// Number of levels
    pub levels: usize,
    /// Price distance between adjacent rungs
    pub spacing: Decimal,
    /// The rungs, ordered by price ascending
    pub rungs: Vec<GridRung>,
}

impl GridLadder {
    /// Build a ladder between `lower` and `upper` with `levels` rungs,
    /// sided against `reference` (typically the current mid price).
    ///
    /// Degenerate parameters (`levels < 2`, inverted bounds, a
    /// non-positive reference) are rejected; the config layer catches
    /// them first, but a bad reference price can only be seen here.
    pub fn build(
        symbol: impl Into<String>,
        lower: Decimal,
        upper: Decimal,
        levels: usize,
        quantity_per_rung: Decimal,
        reference: Decimal,
    ) -> Result<Self, StrategyError> {
        if levels < 2 {
            return Err(StrategyError::InvalidConfig(format!(
                "grid needs at least 2 levels, got {levels}"
            )));
        }
        if lower >= upper {
            return Err(StrategyError::InvalidConfig(format!(
                "grid bounds inverted: lower {lower} >= upper {upper}"
            )));
        }
        if reference <= Decimal::ZERO {
            return Err(StrategyError::InvalidConfig(format!(
                "grid reference price must be positive, got {reference}"
            )));
        }

        let spacing = (upper - lower) / Decimal::from(levels as u64 - 1);
        let rungs = (0..levels)
            .map(|index| {
                let price = lower + spacing * Decimal::from(index as u64);
                let side = if price < reference { Side::Buy } else { Side::Sell };
                GridRung {
                    index,
                    price,
                    side,
                    quantity: quantity_per_rung,
                    client_order_id: None,
                    state: if price == reference { RungState::Filled } else { RungState::Idle },
                }
            })
            .collect();

        Ok(Self {
            symbol: symbol.into(),
            lower,
            upper,
            levels,
            spacing,
            rungs,
        })
    }

    /// Total notional the ladder would commit if every rung rested.
    pub fn total_notional(&self) -> Decimal {
        self.rungs.iter().map(|r| r.price * r.quantity).sum()
    }

    /// Rungs currently idle (need an order placed).
    pub fn idle_rungs(&self) -> impl Iterator<Item = &GridRung> {
        self.rungs.iter().filter(|r| r.state == RungState::Idle)
    }

    /// Find a rung by the client order id of its resting order.
    pub fn rung_by_order(&mut self, client_order_id: &str) -> Option<&mut GridRung> {
        self.rungs
            .iter_mut()
            .find(|r| r.client_order_id.as_deref() == Some(client_order_id))
    }
}
