//! Risk management: sizing, stops, trailing stops and liquidation.
//!
//! The `RiskManager` is the only path from a Signal to an order request.
//! An approved directional order always carries its stop levels; a naked
//! entry is not representable.

mod liquidation;
mod manager;
mod sizing;
mod stops;

pub use liquidation::{LiquidationMonitor, LiquidationThresholds, RiskEvent, RiskGrade};
pub use manager::{RiskDecision, RiskManager, RiskSettings, StopLevels};
pub use sizing::{DynamicLimits, PositionSizer};
pub use stops::{compute_stop_levels, TrailingAction, TrailingState, TrailingStop};
