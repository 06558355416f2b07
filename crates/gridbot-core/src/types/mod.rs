//! Core data types for the trading engine.

mod candle;
mod grid;
mod order;
mod position;
mod signal;
mod timeframe;

pub use candle::{AppendOutcome, Candle, CandleSeries, Ticker};
pub use grid::{GridLadder, GridRung, RungState};
pub use order::{Fill, Order, OrderRequest, OrderStatus, OrderType, RejectReason, Side};
pub use position::{Account, Position, PositionStatus, ProtectiveOrders};
pub use signal::{Direction, Signal, SignalStrength};
pub use timeframe::Timeframe;
