//! Core traits for the trading engine.

mod exchange;
mod indicator;

pub use exchange::Exchange;
pub use indicator::{Indicator, MultiOutputIndicator};
