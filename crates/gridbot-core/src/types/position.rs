//! Position and account types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::{Fill, Side};

/// Position lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    /// Entry order submitted, no fill yet
    Opening,
    /// Holds quantity
    Open,
    /// Exit order submitted, not yet fully filled
    Closing,
    /// Fully exited
    Closed,
}

/// Protective orders attached to a position.
///
/// Orders are referenced by exchange id only. Holding the `Order` itself
/// here would put two owners on one mutable object; the tracker resolves
/// ids against the executor's order map when it needs current state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProtectiveOrders {
    /// Active stop-loss order id. An open position must always have one.
    pub stop_loss_id: Option<String>,
    /// Active take-profit order id, mutually exclusive with a trailing stop
    pub take_profit_id: Option<String>,
    /// Whether the exit is managed by a local trailing stop instead of a
    /// resting take-profit
    pub trailing: bool,
}

/// A leveraged position in a single symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    /// Symbol
    pub symbol: String,
    /// Long or short
    pub side: Side,
    /// Quantity in base asset, always positive
    pub quantity: Decimal,
    /// Average entry price
    pub entry_price: Decimal,
    /// Leverage applied at entry
    pub leverage: u32,
    /// Lifecycle status
    pub status: PositionStatus,
    /// Protective order references
    pub protective: ProtectiveOrders,
    /// Current mark price
    pub mark_price: Decimal,
    /// Unrealized profit/loss in quote asset
    pub unrealized_pnl: Decimal,
    /// Realized profit/loss from closed portions
    pub realized_pnl: Decimal,
    /// Total fees paid
    pub fees_paid: Decimal,
    /// Strategy that opened the position
    pub strategy_id: String,
    /// When the position was opened
    pub opened_at: DateTime<Utc>,
    /// When the position was closed
    pub closed_at: Option<DateTime<Utc>>,
}

impl Position {
    /// Create a position in the Opening state, before the entry fill.
    pub fn opening(
        symbol: impl Into<String>,
        side: Side,
        leverage: u32,
        strategy_id: impl Into<String>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            quantity: Decimal::ZERO,
            entry_price: Decimal::ZERO,
            leverage,
            status: PositionStatus::Opening,
            protective: ProtectiveOrders::default(),
            mark_price: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            fees_paid: Decimal::ZERO,
            strategy_id: strategy_id.into(),
            opened_at: Utc::now(),
            closed_at: None,
        }
    }

    /// Check if the position still holds quantity.
    pub fn is_open(&self) -> bool {
        matches!(self.status, PositionStatus::Open | PositionStatus::Closing)
    }

    /// Notional value at the mark price.
    pub fn notional(&self) -> Decimal {
        self.quantity * self.mark_price
    }

    /// Margin backing the position under isolated margin.
    pub fn margin(&self) -> Decimal {
        if self.leverage == 0 {
            return Decimal::ZERO;
        }
        self.quantity * self.entry_price / Decimal::from(self.leverage)
    }

    /// Update the mark price and recompute unrealized PnL.
    pub fn update_mark(&mut self, price: Decimal) {
        self.mark_price = price;
        let diff = match self.side {
            Side::Buy => price - self.entry_price,
            Side::Sell => self.entry_price - price,
        };
        self.unrealized_pnl = diff * self.quantity;
    }

    /// Apply a fill. Fills on the position side add quantity and move the
    /// average entry; fills on the opposite side reduce and realize PnL.
    ///
    /// Returns the realized PnL of the closed portion.
    pub fn apply_fill(&mut self, fill: &Fill) -> Decimal {
        self.fees_paid += fill.fee;

        if fill.side == self.side {
            // Adding to the position.
            let total_cost = self.quantity * self.entry_price + fill.quantity * fill.price;
            self.quantity += fill.quantity;
            if self.quantity > Decimal::ZERO {
                self.entry_price = total_cost / self.quantity;
            }
            if self.status == PositionStatus::Opening {
                self.status = PositionStatus::Open;
                self.opened_at = fill.timestamp;
            }
            self.update_mark(fill.price);
            return Decimal::ZERO;
        }

        // Reducing. Quantity never goes negative; a reversal would be a
        // distinct position opened by the strategy, not a flip here.
        let close_qty = fill.quantity.min(self.quantity);
        let realized = match self.side {
            Side::Buy => close_qty * (fill.price - self.entry_price),
            Side::Sell => close_qty * (self.entry_price - fill.price),
        };
        self.realized_pnl += realized;
        self.quantity -= close_qty;

        if self.quantity == Decimal::ZERO {
            self.status = PositionStatus::Closed;
            self.closed_at = Some(fill.timestamp);
            self.protective = ProtectiveOrders::default();
        }
        self.update_mark(fill.price);

        realized
    }

    /// PnL as a fraction of the entry notional.
    pub fn pnl_percent(&self) -> Decimal {
        let basis = self.quantity * self.entry_price;
        if basis == Decimal::ZERO {
            return Decimal::ZERO;
        }
        self.unrealized_pnl / basis * Decimal::from(100)
    }
}

/// Account snapshot: balance plus open positions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Account {
    /// Free quote-asset balance
    pub balance: Decimal,
    /// Balance plus unrealized PnL and locked margin
    pub equity: Decimal,
    /// Open positions by symbol
    pub positions: HashMap<String, Position>,
}

impl Account {
    /// Create an account with an initial balance.
    pub fn new(balance: Decimal) -> Self {
        Self {
            balance,
            equity: balance,
            positions: HashMap::new(),
        }
    }

    /// Get a position by symbol.
    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    /// Check if there is an open position in a symbol.
    pub fn has_position(&self, symbol: &str) -> bool {
        self.positions.get(symbol).map(|p| p.is_open()).unwrap_or(false)
    }

    /// Number of open positions.
    pub fn open_position_count(&self) -> usize {
        self.positions.values().filter(|p| p.is_open()).count()
    }

    /// Recompute equity from balance, margin and unrealized PnL.
    pub fn update_equity(&mut self) {
        let margin: Decimal = self.positions.values().filter(|p| p.is_open()).map(|p| p.margin()).sum();
        let upnl: Decimal = self
            .positions
            .values()
            .filter(|p| p.is_open())
            .map(|p| p.unrealized_pnl)
            .sum();
        self.equity = self.balance + margin + upnl;
    }
}
