//! Technical indicators and the indicator engine.
//!
//! This crate provides the indicator kernels the strategies read:
//! - Momentum (RSI with Wilder smoothing, MACD)
//! - Moving averages (EMA, volume EMA with surge predicate)
//! - Candlestick pattern classification
//!
//! plus the `IndicatorEngine`, which owns candle history per
//! (symbol, timeframe) and recomputes an `IndicatorSnapshot` on every
//! closed candle. Every snapshot field is an `Option`: an indicator with
//! insufficient history is absent, never a neutral placeholder.

pub mod engine;
pub mod momentum;
pub mod moving_average;
pub mod pattern;

pub use engine::{IndicatorEngine, IndicatorParams, IndicatorSnapshot};
pub use momentum::{Macd, MacdOutput, Rsi};
pub use moving_average::{Ema, VolumeEma};
pub use pattern::CandlePattern;
