//! Strategy configuration and signal evaluation.
//!
//! The strategy set is a closed enum: evaluation dispatches with an
//! exhaustive match, so adding a strategy means adding a variant and its
//! evaluator arm. Grid, DCA and Manual never produce indicator-driven
//! signals; their entries are generated by the grid engine and manual
//! order path respectively.

pub mod config;
pub mod evaluator;

pub use config::{DcaParams, GridParams, StrategyConfig, StrategyKind};
pub use evaluator::evaluate;
