//! OHLCV candle types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use super::Timeframe;

/// Compact OHLCV candle optimized for indicator math.
/// Uses f64 throughout; order arithmetic converts to Decimal at the
/// execution boundary.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[repr(C)]
pub struct Candle {
    /// Open time, unix milliseconds
    pub open_time: i64,
    /// Opening price
    pub open: f64,
    /// Highest price
    pub high: f64,
    /// Lowest price
    pub low: f64,
    /// Closing price
    pub close: f64,
    /// Base asset volume
    pub volume: f64,
    /// Whether the exchange has closed this candle
    pub closed: bool,
}

impl Candle {
    /// Create a new closed candle.
    pub fn new(open_time: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            open_time,
            open,
            high,
            low,
            close,
            volume,
            closed: true,
        }
    }

    /// Create an in-progress candle.
    pub fn partial(open_time: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            open_time,
            open,
            high,
            low,
            close,
            volume,
            closed: false,
        }
    }

    /// Calculate the candle's range (high - low).
    #[inline]
    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    /// Absolute difference between open and close.
    #[inline]
    pub fn body(&self) -> f64 {
        (self.close - self.open).abs()
    }

    /// Length of the wick above the body.
    #[inline]
    pub fn upper_wick(&self) -> f64 {
        self.high - self.open.max(self.close)
    }

    /// Length of the wick below the body.
    #[inline]
    pub fn lower_wick(&self) -> f64 {
        self.open.min(self.close) - self.low
    }

    /// Check if the candle is bullish (close > open).
    #[inline]
    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    /// Check if the candle is bearish (close < open).
    #[inline]
    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }

    /// Get the open time as a DateTime.
    pub fn datetime(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.open_time).unwrap_or_default()
    }
}

/// A best bid/ask and last-trade snapshot for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    /// Symbol identifier
    pub symbol: String,
    /// Last traded price
    pub last: f64,
    /// Best bid
    pub bid: f64,
    /// Best ask
    pub ask: f64,
    /// Snapshot time, unix milliseconds
    pub timestamp: i64,
}

impl Ticker {
    /// Mid price between best bid and ask.
    pub fn mid(&self) -> f64 {
        (self.bid + self.ask) / 2.0
    }
}

/// Append-only series of closed candles for one (symbol, timeframe).
///
/// Closed candles must arrive with strictly increasing, contiguous open
/// times; a non-contiguous append is reported so the owner can invalidate
/// its indicator window and reconcile. The in-progress candle lives in a
/// separate slot and never enters the closed window.
#[derive(Debug, Clone)]
pub struct CandleSeries {
    /// Symbol identifier
    pub symbol: String,
    /// Timeframe of the candles
    pub timeframe: Timeframe,
    closed: VecDeque<Candle>,
    in_progress: Option<Candle>,
    /// Maximum number of closed candles retained (0 = unlimited)
    capacity: usize,
}

/// Outcome of appending a closed candle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Candle appended, window still contiguous.
    Appended,
    /// Duplicate or older open time, ignored.
    Stale,
    /// Open time skipped ahead; window was cleared and must be refilled.
    Gap { expected: i64, actual: i64 },
}

impl CandleSeries {
    /// Create a new empty series.
    pub fn new(symbol: String, timeframe: Timeframe) -> Self {
        Self {
            symbol,
            timeframe,
            closed: VecDeque::new(),
            in_progress: None,
            capacity: 0,
        }
    }

    /// Create a series retaining at most `capacity` closed candles.
    pub fn with_capacity(symbol: String, timeframe: Timeframe, capacity: usize) -> Self {
        Self {
            symbol,
            timeframe,
            closed: VecDeque::with_capacity(capacity),
            in_progress: None,
            capacity,
        }
    }

    /// Append a closed candle, enforcing monotonic contiguous open times.
    ///
    /// On a gap the closed window is cleared: stale indicator state derived
    /// from it would silently straddle the hole otherwise.
    pub fn append_closed(&mut self, candle: Candle) -> AppendOutcome {
        debug_assert!(candle.closed);

        if let Some(last) = self.closed.back() {
            let expected = last.open_time + self.timeframe.as_millis();
            if candle.open_time <= last.open_time {
                return AppendOutcome::Stale;
            }
            if candle.open_time != expected {
                self.closed.clear();
                self.closed.push_back(candle);
                return AppendOutcome::Gap {
                    expected,
                    actual: candle.open_time,
                };
            }
        }

        if self.capacity > 0 && self.closed.len() >= self.capacity {
            self.closed.pop_front();
        }
        self.closed.push_back(candle);

        // Drop the in-progress slot if the closed candle supersedes it.
        if let Some(p) = self.in_progress {
            if p.open_time <= candle.open_time {
                self.in_progress = None;
            }
        }

        AppendOutcome::Appended
    }

    /// Replace the in-progress candle.
    pub fn set_in_progress(&mut self, candle: Candle) {
        self.in_progress = Some(Candle {
            closed: false,
            ..candle
        });
    }

    /// Get the in-progress candle, if any.
    pub fn in_progress(&self) -> Option<&Candle> {
        self.in_progress.as_ref()
    }

    /// Bulk-load history (e.g. a reconciliation fetch). Replaces the window.
    pub fn reload(&mut self, candles: impl IntoIterator<Item = Candle>) {
        self.closed.clear();
        self.in_progress = None;
        for candle in candles {
            if self
                .closed
                .back()
                .map(|last| candle.open_time > last.open_time)
                .unwrap_or(true)
            {
                if self.capacity > 0 && self.closed.len() >= self.capacity {
                    self.closed.pop_front();
                }
                self.closed.push_back(candle);
            }
        }
    }

    /// Number of closed candles.
    #[inline]
    pub fn len(&self) -> usize {
        self.closed.len()
    }

    /// Check if the series has no closed candles.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.closed.is_empty()
    }

    /// Get the last closed candle.
    pub fn last(&self) -> Option<&Candle> {
        self.closed.back()
    }

    /// Get a closed candle by index (0 = oldest).
    pub fn get(&self, index: usize) -> Option<&Candle> {
        self.closed.get(index)
    }

    /// Get the last N closed candles, oldest first.
    pub fn last_n(&self, n: usize) -> Vec<&Candle> {
        let start = self.closed.len().saturating_sub(n);
        self.closed.iter().skip(start).collect()
    }

    /// Extract close prices.
    pub fn closes(&self) -> Vec<f64> {
        self.closed.iter().map(|c| c.close).collect()
    }

    /// Extract volumes.
    pub fn volumes(&self) -> Vec<f64> {
        self.closed.iter().map(|c| c.volume).collect()
    }

    /// Clear the whole series.
    pub fn clear(&mut self) {
        self.closed.clear();
        self.in_progress = None;
    }

    /// Iterator over closed candles, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Candle> {
        self.closed.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(open_time: i64, close: f64) -> Candle {
        Candle::new(open_time, close, close + 1.0, close - 1.0, close, 1000.0)
    }

    #[test]
    fn test_candle_anatomy() {
        let c = Candle::new(0, 100.0, 110.0, 95.0, 105.0, 1_000_000.0);
        assert!((c.range() - 15.0).abs() < 1e-9);
        assert!((c.body() - 5.0).abs() < 1e-9);
        assert!((c.upper_wick() - 5.0).abs() < 1e-9);
        assert!((c.lower_wick() - 5.0).abs() < 1e-9);
        assert!(c.is_bullish());
    }

    #[test]
    fn test_contiguous_append() {
        let mut series = CandleSeries::new("BTC_USDT".into(), Timeframe::Minute1);
        assert_eq!(series.append_closed(candle(0, 100.0)), AppendOutcome::Appended);
        assert_eq!(
            series.append_closed(candle(60_000, 101.0)),
            AppendOutcome::Appended
        );
        assert_eq!(series.len(), 2);
    }

    #[test]
    fn test_stale_candle_ignored() {
        let mut series = CandleSeries::new("BTC_USDT".into(), Timeframe::Minute1);
        series.append_closed(candle(60_000, 100.0));
        assert_eq!(series.append_closed(candle(60_000, 99.0)), AppendOutcome::Stale);
        assert_eq!(series.append_closed(candle(0, 99.0)), AppendOutcome::Stale);
        assert_eq!(series.len(), 1);
    }

    #[test]
    fn test_gap_clears_window() {
        let mut series = CandleSeries::new("BTC_USDT".into(), Timeframe::Minute1);
        series.append_closed(candle(0, 100.0));
        series.append_closed(candle(60_000, 101.0));

        let outcome = series.append_closed(candle(240_000, 103.0));
        assert_eq!(
            outcome,
            AppendOutcome::Gap {
                expected: 120_000,
                actual: 240_000
            }
        );
        // Only the post-gap candle survives.
        assert_eq!(series.len(), 1);
        assert_eq!(series.last().unwrap().open_time, 240_000);
    }

    #[test]
    fn test_capacity_eviction() {
        let mut series = CandleSeries::with_capacity("BTC_USDT".into(), Timeframe::Minute1, 3);
        for i in 0..5 {
            series.append_closed(candle(i * 60_000, 100.0 + i as f64));
        }
        assert_eq!(series.len(), 3);
        assert_eq!(series.get(0).unwrap().open_time, 120_000);
    }

    #[test]
    fn test_in_progress_superseded_by_close() {
        let mut series = CandleSeries::new("BTC_USDT".into(), Timeframe::Minute1);
        series.append_closed(candle(0, 100.0));
        series.set_in_progress(Candle::partial(60_000, 100.0, 101.0, 99.0, 100.5, 10.0));
        assert!(series.in_progress().is_some());

        series.append_closed(candle(60_000, 100.7));
        assert!(series.in_progress().is_none());
        assert_eq!(series.len(), 2);
    }

    #[test]
    fn test_reload_replaces_window() {
        let mut series = CandleSeries::new("BTC_USDT".into(), Timeframe::Minute1);
        series.append_closed(candle(0, 100.0));
        series.reload((0..4).map(|i| candle(600_000 + i * 60_000, 200.0 + i as f64)));
        assert_eq!(series.len(), 4);
        assert_eq!(series.get(0).unwrap().open_time, 600_000);
    }
}
