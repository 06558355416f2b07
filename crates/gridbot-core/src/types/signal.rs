//! Trading signal types produced by strategy evaluation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Direction of a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Long,
    Short,
    /// No actionable edge. The safe default whenever inputs are undefined.
    #[default]
    Flat,
}

impl Direction {
    /// Check if the signal asks for an entry.
    pub fn is_actionable(&self) -> bool {
        !matches!(self, Direction::Flat)
    }
}

/// Coarse conviction grade, derived from how far the triggering
/// indicator sits beyond its threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalStrength {
    Weak,
    Moderate,
    Strong,
}

/// A strategy evaluation result for one symbol at one instant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    /// Symbol the signal applies to
    pub symbol: String,
    /// Long, short or flat
    pub direction: Direction,
    /// Conviction grade
    pub strength: SignalStrength,
    /// Confidence in [0, 1]
    pub confidence: f64,
    /// Strategy instance that produced the signal
    pub source: String,
    /// Evaluation timestamp
    pub timestamp: DateTime<Utc>,
}

impl Signal {
    /// Create a flat (no-action) signal.
    pub fn flat(symbol: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            direction: Direction::Flat,
            strength: SignalStrength::Weak,
            confidence: 0.0,
            source: source.into(),
            timestamp: Utc::now(),
        }
    }

    /// Create an actionable signal.
    pub fn entry(
        symbol: impl Into<String>,
        direction: Direction,
        strength: SignalStrength,
        confidence: f64,
        source: impl Into<String>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            direction,
            strength,
            confidence: confidence.clamp(0.0, 1.0),
            source: source.into(),
            timestamp: Utc::now(),
        }
    }
}
