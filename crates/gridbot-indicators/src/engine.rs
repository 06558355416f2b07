//! Per-symbol indicator engine.

use std::collections::HashMap;

use gridbot_core::traits::{Indicator, MultiOutputIndicator};
use gridbot_core::types::{AppendOutcome, Candle, CandleSeries, Timeframe};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::momentum::{Macd, MacdOutput, Rsi};
use crate::moving_average::VolumeEma;
use crate::pattern::CandlePattern;

/// Indicator periods shared by all tracked series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorParams {
    pub rsi_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub volume_period: usize,
}

impl Default for IndicatorParams {
    fn default() -> Self {
        Self {
            rsi_period: 14,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            volume_period: 20,
        }
    }
}

/// Indicator values for one (symbol, timeframe) at one closed candle.
///
/// Every field is `Option`: when history is too short for a kernel the
/// field is `None` and strategies reading it evaluate flat.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    /// Open time of the candle this snapshot was computed at
    pub open_time: i64,
    /// Close of that candle
    pub close: f64,
    pub rsi: Option<f64>,
    pub macd: Option<MacdOutput>,
    pub volume_ema: Option<f64>,
    pub last_volume: Option<f64>,
    pub pattern: Option<CandlePattern>,
}

/// Owns candle history per (symbol, timeframe) and recomputes snapshots
/// on every closed candle.
///
/// Snapshots for all timeframes of a symbol are stored in one map, so a
/// multi-timeframe strategy reads a single consistent view per tick.
pub struct IndicatorEngine {
    params: IndicatorParams,
    capacity: usize,
    rsi: Rsi,
    macd: Macd,
    volume_ema: VolumeEma,
    series: HashMap<(String, Timeframe), CandleSeries>,
    snapshots: HashMap<String, HashMap<Timeframe, IndicatorSnapshot>>,
}

impl IndicatorEngine {
    /// Create an engine retaining `capacity` closed candles per series.
    pub fn new(params: IndicatorParams, capacity: usize) -> Self {
        let rsi = Rsi::new(params.rsi_period);
        let macd = Macd::with_periods(params.macd_fast, params.macd_slow, params.macd_signal);
        let volume_ema = VolumeEma::new(params.volume_period);
        Self {
            params,
            capacity,
            rsi,
            macd,
            volume_ema,
            series: HashMap::new(),
            snapshots: HashMap::new(),
        }
    }

    /// Ensure a series exists for (symbol, timeframe).
    pub fn track(&mut self, symbol: &str, timeframe: Timeframe) {
        self.series
            .entry((symbol.to_string(), timeframe))
            .or_insert_with(|| {
                CandleSeries::with_capacity(symbol.to_string(), timeframe, self.capacity)
            });
    }

    /// Bulk-load history (initial fill or a reconciliation fetch) and
    /// recompute the snapshot.
    pub fn seed(&mut self, symbol: &str, timeframe: Timeframe, candles: Vec<Candle>) {
        self.track(symbol, timeframe);
        if let Some(series) = self.series.get_mut(&(symbol.to_string(), timeframe)) {
            series.reload(candles.into_iter().filter(|c| c.closed));
        }
        self.recompute(symbol, timeframe);
    }

    /// Apply a closed candle.
    ///
    /// On a gap the stale snapshot is dropped before the outcome is
    /// returned; the caller must reconcile before strategies can see a
    /// defined snapshot again.
    pub fn on_closed_candle(
        &mut self,
        symbol: &str,
        timeframe: Timeframe,
        candle: Candle,
    ) -> AppendOutcome {
        self.track(symbol, timeframe);
        let outcome = match self.series.get_mut(&(symbol.to_string(), timeframe)) {
            Some(series) => series.append_closed(candle),
            None => return AppendOutcome::Stale,
        };

        match outcome {
            AppendOutcome::Appended => self.recompute(symbol, timeframe),
            AppendOutcome::Stale => {
                debug!(symbol, %timeframe, open_time = candle.open_time, "stale candle ignored");
            }
            AppendOutcome::Gap { expected, actual } => {
                warn!(
                    symbol,
                    %timeframe,
                    expected,
                    actual,
                    "candle gap detected, snapshot invalidated"
                );
                self.invalidate(symbol, timeframe);
            }
        }
        outcome
    }

    /// Drop the snapshot for one (symbol, timeframe).
    pub fn invalidate(&mut self, symbol: &str, timeframe: Timeframe) {
        if let Some(by_tf) = self.snapshots.get_mut(symbol) {
            by_tf.remove(&timeframe);
        }
    }

    /// Snapshot for one (symbol, timeframe), if defined.
    pub fn snapshot(&self, symbol: &str, timeframe: Timeframe) -> Option<&IndicatorSnapshot> {
        self.snapshots.get(symbol)?.get(&timeframe)
    }

    /// All timeframe snapshots for a symbol.
    pub fn snapshots(&self, symbol: &str) -> Option<&HashMap<Timeframe, IndicatorSnapshot>> {
        self.snapshots.get(symbol)
    }

    /// Number of closed candles held for one (symbol, timeframe).
    pub fn history_len(&self, symbol: &str, timeframe: Timeframe) -> usize {
        self.series
            .get(&(symbol.to_string(), timeframe))
            .map(|s| s.len())
            .unwrap_or(0)
    }

    fn recompute(&mut self, symbol: &str, timeframe: Timeframe) {
        let Some(series) = self.series.get(&(symbol.to_string(), timeframe)) else {
            return;
        };
        let Some(last) = series.last() else {
            self.invalidate(symbol, timeframe);
            return;
        };

        let closes = series.closes();
        let volumes = series.volumes();

        let rsi = self.rsi.calculate(&closes).last().copied();
        let macd = MultiOutputIndicator::calculate(&self.macd, &closes)
            .last()
            .copied();
        let volume_ema = Indicator::calculate(&self.volume_ema, &volumes).last().copied();
        let last_volume = volumes.last().copied();

        let pattern = if series.len() >= 2 {
            series
                .get(series.len() - 2)
                .map(|prev| CandlePattern::classify(prev, last))
        } else {
            None
        };

        let snapshot = IndicatorSnapshot {
            open_time: last.open_time,
            close: last.close,
            rsi,
            macd,
            volume_ema,
            last_volume,
            pattern,
        };

        self.snapshots
            .entry(symbol.to_string())
            .or_default()
            .insert(timeframe, snapshot);
    }

    /// The parameters this engine was built with.
    pub fn params(&self) -> &IndicatorParams {
        &self.params
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(open_time: i64, close: f64, volume: f64) -> Candle {
        Candle::new(open_time, close, close + 1.0, close - 1.0, close, volume)
    }

    fn engine() -> IndicatorEngine {
        IndicatorEngine::new(IndicatorParams::default(), 500)
    }

    #[test]
    fn test_snapshot_undefined_until_warm() {
        let mut engine = engine();
        for i in 0..5 {
            engine.on_closed_candle(
                "BTC_USDT",
                Timeframe::Minute5,
                candle(i * 300_000, 100.0 + i as f64, 1000.0),
            );
        }

        let snapshot = engine.snapshot("BTC_USDT", Timeframe::Minute5).unwrap();
        // Five closes: too short for every kernel at default periods.
        assert!(snapshot.rsi.is_none());
        assert!(snapshot.macd.is_none());
        assert!(snapshot.volume_ema.is_none());
        // The pattern only needs two candles.
        assert!(snapshot.pattern.is_some());
    }

    #[test]
    fn test_snapshot_defined_after_warmup() {
        let mut engine = engine();
        for i in 0..60 {
            engine.on_closed_candle(
                "BTC_USDT",
                Timeframe::Minute5,
                candle(i * 300_000, 100.0 + (i as f64 * 0.3).sin() * 5.0, 1000.0),
            );
        }

        let snapshot = engine.snapshot("BTC_USDT", Timeframe::Minute5).unwrap();
        assert!(snapshot.rsi.is_some());
        assert!(snapshot.macd.is_some());
        assert!(snapshot.volume_ema.is_some());
        assert_eq!(snapshot.last_volume, Some(1000.0));
    }

    #[test]
    fn test_gap_invalidates_snapshot() {
        let mut engine = engine();
        for i in 0..60 {
            engine.on_closed_candle(
                "BTC_USDT",
                Timeframe::Minute5,
                candle(i * 300_000, 100.0 + i as f64 * 0.1, 1000.0),
            );
        }
        assert!(engine.snapshot("BTC_USDT", Timeframe::Minute5).is_some());

        // Skip two candles.
        let outcome = engine.on_closed_candle(
            "BTC_USDT",
            Timeframe::Minute5,
            candle(63 * 300_000, 110.0, 1000.0),
        );
        assert!(matches!(outcome, AppendOutcome::Gap { .. }));
        assert!(engine.snapshot("BTC_USDT", Timeframe::Minute5).is_none());
    }

    #[test]
    fn test_seed_after_gap_restores_snapshot() {
        let mut engine = engine();
        engine.seed(
            "BTC_USDT",
            Timeframe::Minute5,
            (0..60)
                .map(|i| candle(i * 300_000, 100.0 + i as f64 * 0.1, 1000.0))
                .collect(),
        );
        assert!(engine.snapshot("BTC_USDT", Timeframe::Minute5).is_some());
        assert_eq!(engine.history_len("BTC_USDT", Timeframe::Minute5), 60);
    }

    #[test]
    fn test_multi_timeframe_snapshots_coexist() {
        let mut engine = engine();
        for i in 0..60 {
            engine.on_closed_candle(
                "BTC_USDT",
                Timeframe::Minute5,
                candle(i * 300_000, 100.0 + i as f64 * 0.1, 1000.0),
            );
            engine.on_closed_candle(
                "BTC_USDT",
                Timeframe::Hour1,
                candle(i * 3_600_000, 100.0 + i as f64 * 0.2, 5000.0),
            );
        }

        let by_tf = engine.snapshots("BTC_USDT").unwrap();
        assert!(by_tf.contains_key(&Timeframe::Minute5));
        assert!(by_tf.contains_key(&Timeframe::Hour1));
    }
}
