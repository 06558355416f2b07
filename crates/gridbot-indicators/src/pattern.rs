//! Candlestick pattern classification.

use gridbot_core::types::Candle;
use serde::{Deserialize, Serialize};

/// Two-candle pattern classification over the last closed candles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CandlePattern {
    #[default]
    None,
    BullishEngulfing,
    BearishEngulfing,
    Hammer,
    ShootingStar,
}

impl CandlePattern {
    /// Classify the pattern formed by `previous` and `current`.
    ///
    /// Engulfing takes precedence over pin bars when both match.
    pub fn classify(previous: &Candle, current: &Candle) -> Self {
        let bullish_engulfing = current.open < previous.close
            && current.close > previous.open
            && current.close - current.open > previous.open - previous.close;

        if bullish_engulfing {
            return CandlePattern::BullishEngulfing;
        }

        let bearish_engulfing = current.open > previous.close
            && current.close < previous.open
            && current.open - current.close > previous.close - previous.open;

        if bearish_engulfing {
            return CandlePattern::BearishEngulfing;
        }

        let total_range = current.range();
        if total_range <= 0.0 {
            return CandlePattern::None;
        }
        let body_ratio = current.body() / total_range;
        if body_ratio >= 0.3 {
            return CandlePattern::None;
        }

        // Pin bars: small body, one dominant wick.
        if current.is_bullish()
            && (current.high - current.close) < (current.open - current.low) * 0.3
        {
            return CandlePattern::Hammer;
        }
        if current.is_bearish()
            && (current.open - current.low) < (current.high - current.close) * 0.3
        {
            return CandlePattern::ShootingStar;
        }

        CandlePattern::None
    }

    /// Whether the pattern suggests upward continuation or reversal.
    pub fn is_bullish(&self) -> bool {
        matches!(self, CandlePattern::BullishEngulfing | CandlePattern::Hammer)
    }

    /// Whether the pattern suggests downward continuation or reversal.
    pub fn is_bearish(&self) -> bool {
        matches!(
            self,
            CandlePattern::BearishEngulfing | CandlePattern::ShootingStar
        )
    }
}
