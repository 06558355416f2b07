//! Momentum indicators.

use gridbot_core::traits::{Indicator, MultiOutputIndicator};
use serde::{Deserialize, Serialize};

use crate::moving_average::Ema;

/// Relative Strength Index (RSI).
///
/// Measures the speed and magnitude of recent price changes to evaluate
/// overbought or oversold conditions. Undefined until period+1 closes
/// are available; the output is simply empty until then.
#[derive(Debug, Clone)]
pub struct Rsi {
    period: usize,
}

impl Rsi {
    /// Create a new RSI indicator.
    ///
    /// Common periods are 14 (default) or 9.
    pub fn new(period: usize) -> Self {
        assert!(period > 0, "Period must be greater than 0");
        Self { period }
    }

    fn rs_to_rsi(avg_gain: f64, avg_loss: f64) -> f64 {
        if avg_loss == 0.0 {
            100.0
        } else {
            100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
        }
    }
}

impl Indicator for Rsi {
    type Output = f64;

    /// Single pass over the deltas with Wilder's smoothing:
    /// avg = (prev_avg * (period-1) + value) / period.
    fn calculate(&self, data: &[f64]) -> Vec<f64> {
        if data.len() <= self.period {
            return vec![];
        }

        let n = self.period as f64;
        let mut avg_gain = 0.0;
        let mut avg_loss = 0.0;

        // Seed the averages from the first `period` deltas.
        for window in data[..=self.period].windows(2) {
            let change = window[1] - window[0];
            if change > 0.0 {
                avg_gain += change;
            } else {
                avg_loss -= change;
            }
        }
        avg_gain /= n;
        avg_loss /= n;

        let mut result = Vec::with_capacity(data.len() - self.period);
        result.push(Self::rs_to_rsi(avg_gain, avg_loss));

        for window in data[self.period..].windows(2) {
            let change = window[1] - window[0];
            let (gain, loss) = if change > 0.0 {
                (change, 0.0)
            } else {
                (0.0, -change)
            };
            avg_gain = (avg_gain * (n - 1.0) + gain) / n;
            avg_loss = (avg_loss * (n - 1.0) + loss) / n;
            result.push(Self::rs_to_rsi(avg_gain, avg_loss));
        }

        result
    }

    fn period(&self) -> usize {
        self.period + 1 // Need period+1 data points
    }

    fn name(&self) -> &str {
        "RSI"
    }
}

/// MACD (Moving Average Convergence Divergence) output.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MacdOutput {
    /// MACD line (fast EMA - slow EMA)
    pub macd: f64,
    /// Signal line (EMA of MACD)
    pub signal: f64,
    /// Histogram (MACD - Signal)
    pub histogram: f64,
}

/// MACD indicator.
///
/// Built on the same SMA-seeded EMA kernel the moving-average module
/// exposes, so all three lines share one convention for where the
/// series becomes defined.
#[derive(Debug, Clone)]
pub struct Macd {
    fast: Ema,
    slow: Ema,
    signal: Ema,
}

impl Macd {
    /// Create a new MACD with default parameters (12, 26, 9).
    pub fn new() -> Self {
        Self::with_periods(12, 26, 9)
    }

    /// Create a MACD with custom periods.
    pub fn with_periods(fast: usize, slow: usize, signal: usize) -> Self {
        assert!(fast < slow, "Fast period must be less than slow period");
        Self {
            fast: Ema::new(fast),
            slow: Ema::new(slow),
            signal: Ema::new(signal),
        }
    }
}

impl Default for Macd {
    fn default() -> Self {
        Self::new()
    }
}

impl MultiOutputIndicator for Macd {
    type Outputs = MacdOutput;

    fn calculate(&self, data: &[f64]) -> Vec<MacdOutput> {
        if data.len() < self.period() {
            return vec![];
        }

        let fast_ema = self.fast.calculate(data);
        let slow_ema = self.slow.calculate(data);

        // The fast series starts earlier; drop its head so both series
        // cover the same closes.
        let skip = self.slow.period() - self.fast.period();
        let macd_line: Vec<f64> = fast_ema[skip..]
            .iter()
            .zip(&slow_ema)
            .map(|(f, s)| f - s)
            .collect();

        let signal_line = self.signal.calculate(&macd_line);
        if signal_line.is_empty() {
            return vec![];
        }

        let skip = self.signal.period() - 1;
        macd_line[skip..]
            .iter()
            .zip(&signal_line)
            .map(|(&macd, &signal)| MacdOutput {
                macd,
                signal,
                histogram: macd - signal,
            })
            .collect()
    }

    fn period(&self) -> usize {
        self.slow.period() + self.signal.period()
    }

    fn name(&self) -> &str {
        "MACD"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rsi_bounded() {
        let rsi = Rsi::new(14);
        let data: Vec<f64> = (0..30)
            .map(|i| 100.0 + (i as f64 * 0.5).sin() * 5.0)
            .collect();

        let result = rsi.calculate(&data);
        assert_eq!(result.len(), data.len() - 14);

        for value in &result {
            assert!(*value >= 0.0 && *value <= 100.0);
        }
    }

    #[test]
    fn test_rsi_all_gains() {
        let rsi = Rsi::new(5);
        let data = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0];
        let result = rsi.calculate(&data);

        assert!(!result.is_empty());
        assert!((result[0] - 100.0).abs() < 1e-10);
    }

    #[test]
    fn test_rsi_all_losses() {
        let rsi = Rsi::new(5);
        let data = vec![7.0, 6.0, 5.0, 4.0, 3.0, 2.0, 1.0];
        let result = rsi.calculate(&data);

        assert!(!result.is_empty());
        assert!(result[0].abs() < 1e-10);
    }

    #[test]
    fn test_rsi_insufficient_data_is_empty() {
        let rsi = Rsi::new(14);
        // Exactly period closes: one delta short of defined.
        let data: Vec<f64> = (0..14).map(|i| 100.0 + i as f64).collect();
        assert!(rsi.calculate(&data).is_empty());
    }

    #[test]
    fn test_macd_uptrend_positive() {
        let macd = Macd::new();
        let data: Vec<f64> = (0..50).map(|i| 100.0 + i as f64).collect();
        let result = macd.calculate(&data);

        assert!(!result.is_empty());
        assert!(result.last().unwrap().macd > 0.0);
    }

    #[test]
    fn test_macd_custom_periods() {
        let macd = Macd::with_periods(5, 10, 3);
        let data: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        let result = macd.calculate(&data);

        assert!(!result.is_empty());
        let last = result.last().unwrap();
        assert!((last.histogram - (last.macd - last.signal)).abs() < 1e-10);
    }

    #[test]
    fn test_macd_insufficient_data_is_empty() {
        let macd = Macd::new();
        let data: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        assert!(macd.calculate(&data).is_empty());
    }
}
