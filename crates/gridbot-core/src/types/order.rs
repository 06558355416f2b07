//! Order, fill and rejection types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Order side (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Get the opposite side.
    pub fn opposite(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// Sign for position arithmetic (+1 for buy, -1 for sell).
    pub fn sign(&self) -> Decimal {
        match self {
            Side::Buy => Decimal::ONE,
            Side::Sell => -Decimal::ONE,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    /// Execute immediately at best available price
    Market,
    /// Execute at the limit price or better
    Limit,
    /// Becomes a market order when the trigger price is crossed against
    /// the position
    Stop,
    /// Becomes a market order when the trigger price is crossed in favor
    /// of the position
    TakeProfit,
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderType::Market => write!(f, "MARKET"),
            OrderType::Limit => write!(f, "LIMIT"),
            OrderType::Stop => write!(f, "STOP"),
            OrderType::TakeProfit => write!(f, "TAKE_PROFIT"),
        }
    }
}

/// Order status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Created locally, not yet submitted
    Pending,
    /// Accepted by the exchange, resting or working
    Submitted,
    /// Partially filled
    PartiallyFilled,
    /// Completely filled
    Filled,
    /// Cancelled before completion
    Cancelled,
    /// Rejected by the exchange
    Rejected,
}

impl OrderStatus {
    /// Check if the order is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected
        )
    }

    /// Check if the order is still working on the exchange.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            OrderStatus::Pending | OrderStatus::Submitted | OrderStatus::PartiallyFilled
        )
    }
}

/// Structured rejection reasons parsed from exchange error payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    InsufficientBalance,
    InvalidSize,
    PriceOutsideLimits,
    UnknownSymbol,
    DuplicateClientOrderId,
    Other(String),
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::InsufficientBalance => write!(f, "insufficient balance"),
            RejectReason::InvalidSize => write!(f, "invalid order size"),
            RejectReason::PriceOutsideLimits => write!(f, "price outside allowed limits"),
            RejectReason::UnknownSymbol => write!(f, "unknown symbol"),
            RejectReason::DuplicateClientOrderId => write!(f, "duplicate client order id"),
            RejectReason::Other(msg) => write!(f, "{}", msg),
        }
    }
}

/// Request for a new order.
///
/// Every request carries a client order id. The executor uses it as the
/// idempotency key, so the same request submitted twice cannot become two
/// exchange orders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Symbol to trade, e.g. "BTC_USDT"
    pub symbol: String,
    /// Buy or sell
    pub side: Side,
    /// Type of order
    pub order_type: OrderType,
    /// Quantity in base asset
    pub quantity: Decimal,
    /// Limit price (limit orders)
    pub limit_price: Option<Decimal>,
    /// Trigger price (stop and take-profit orders)
    pub trigger_price: Option<Decimal>,
    /// Leverage to apply, 1 = spot-equivalent
    pub leverage: u32,
    /// Whether this order reduces an existing position only
    pub reduce_only: bool,
    /// Client-assigned idempotency key
    pub client_order_id: String,
}

impl OrderRequest {
    /// Generate a client order id with a short strategy prefix.
    pub fn generate_client_order_id(prefix: &str) -> String {
        format!("{}_{}", prefix, Uuid::new_v4().simple())
    }

    /// Create a market order request.
    pub fn market(symbol: impl Into<String>, side: Side, quantity: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::Market,
            quantity,
            limit_price: None,
            trigger_price: None,
            leverage: 1,
            reduce_only: false,
            client_order_id: Self::generate_client_order_id("mkt"),
        }
    }

    /// Create a limit order request.
    pub fn limit(
        symbol: impl Into<String>,
        side: Side,
        quantity: Decimal,
        limit_price: Decimal,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::Limit,
            quantity,
            limit_price: Some(limit_price),
            trigger_price: None,
            leverage: 1,
            reduce_only: false,
            client_order_id: Self::generate_client_order_id("lmt"),
        }
    }

    /// Create a stop order request (protective, reduce-only).
    pub fn stop(
        symbol: impl Into<String>,
        side: Side,
        quantity: Decimal,
        trigger_price: Decimal,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::Stop,
            quantity,
            limit_price: None,
            trigger_price: Some(trigger_price),
            leverage: 1,
            reduce_only: true,
            client_order_id: Self::generate_client_order_id("stp"),
        }
    }

    /// Create a take-profit order request (reduce-only).
    pub fn take_profit(
        symbol: impl Into<String>,
        side: Side,
        quantity: Decimal,
        trigger_price: Decimal,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::TakeProfit,
            quantity,
            limit_price: None,
            trigger_price: Some(trigger_price),
            leverage: 1,
            reduce_only: true,
            client_order_id: Self::generate_client_order_id("tp"),
        }
    }

    /// Set the leverage.
    pub fn with_leverage(mut self, leverage: u32) -> Self {
        self.leverage = leverage;
        self
    }

    /// Override the client order id.
    pub fn with_client_order_id(mut self, id: impl Into<String>) -> Self {
        self.client_order_id = id.into();
        self
    }
}

/// A fill is a partial or complete execution of an order.
///
/// `sequence` is the exchange-assigned per-symbol stream sequence number.
/// Fills must be applied to position state in sequence order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    /// Exchange fill id
    pub id: String,
    /// Exchange order id this fill belongs to
    pub order_id: String,
    /// Symbol
    pub symbol: String,
    /// Side of the filled order
    pub side: Side,
    /// Quantity filled
    pub quantity: Decimal,
    /// Execution price
    pub price: Decimal,
    /// Fee charged, in quote asset
    pub fee: Decimal,
    /// Per-symbol stream sequence number
    pub sequence: u64,
    /// Execution timestamp
    pub timestamp: DateTime<Utc>,
}

/// Complete order with status and fill progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    /// Exchange-assigned order id
    pub id: String,
    /// Client-assigned idempotency key
    pub client_order_id: String,
    /// Symbol traded
    pub symbol: String,
    /// Buy or sell
    pub side: Side,
    /// Type of order
    pub order_type: OrderType,
    /// Original quantity
    pub quantity: Decimal,
    /// Limit price
    pub limit_price: Option<Decimal>,
    /// Trigger price
    pub trigger_price: Option<Decimal>,
    /// Leverage applied
    pub leverage: u32,
    /// Reduce-only flag
    pub reduce_only: bool,
    /// Current status
    pub status: OrderStatus,
    /// Quantity filled so far
    pub filled_quantity: Decimal,
    /// Average fill price
    pub filled_avg_price: Option<Decimal>,
    /// Rejection reason, when status is Rejected
    pub reject_reason: Option<RejectReason>,
    /// When the order was created locally
    pub created_at: DateTime<Utc>,
    /// When the order was last updated
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Create a pending order from a request, before submission.
    pub fn from_request(request: &OrderRequest) -> Self {
        let now = Utc::now();
        Self {
            id: String::new(),
            client_order_id: request.client_order_id.clone(),
            symbol: request.symbol.clone(),
            side: request.side,
            order_type: request.order_type,
            quantity: request.quantity,
            limit_price: request.limit_price,
            trigger_price: request.trigger_price,
            leverage: request.leverage,
            reduce_only: request.reduce_only,
            status: OrderStatus::Pending,
            filled_quantity: Decimal::ZERO,
            filled_avg_price: None,
            reject_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Remaining quantity to be filled.
    pub fn remaining_quantity(&self) -> Decimal {
        self.quantity - self.filled_quantity
    }

    /// Check if the order is completely filled.
    pub fn is_filled(&self) -> bool {
        self.status == OrderStatus::Filled
    }

    /// Apply a fill, updating quantity, average price and status.
    pub fn apply_fill(&mut self, fill: &Fill) {
        let total_qty = self.filled_quantity + fill.quantity;
        let total_value = self.filled_avg_price.unwrap_or(Decimal::ZERO) * self.filled_quantity
            + fill.price * fill.quantity;

        if total_qty > Decimal::ZERO {
            self.filled_avg_price = Some(total_value / total_qty);
        }
        self.filled_quantity = total_qty;
        self.updated_at = fill.timestamp;

        self.status = if self.filled_quantity >= self.quantity {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
    }
}
