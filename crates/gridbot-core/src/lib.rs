//! Core types and traits for the gridbot trading engine.
//!
//! This crate provides the foundational building blocks including:
//! - Market data types (Candle, CandleSeries)
//! - Order, fill and position types with leveraged-futures fields
//! - Trading signals
//! - The `Exchange` trait and indicator traits
//! - The error taxonomy shared by every other crate

pub mod types;
pub mod traits;
pub mod error;

pub use error::{EngineError, EngineResult};
pub use types::*;
pub use traits::*;
