//! Signal evaluation: pure function from indicator snapshots to a Signal.

use std::collections::HashMap;

use gridbot_core::types::{Direction, Signal, SignalStrength, Timeframe};
use gridbot_indicators::{IndicatorSnapshot, VolumeEma};
use tracing::warn;

use crate::config::{StrategyConfig, StrategyKind};

/// Evaluate a strategy against the current snapshots for its symbol.
///
/// Undefined indicators always evaluate flat. A simultaneous long and
/// short condition cannot occur with a validated config; if it does the
/// evaluator resolves to flat and logs the anomaly.
pub fn evaluate(
    config: &StrategyConfig,
    snapshots: &HashMap<Timeframe, IndicatorSnapshot>,
) -> Signal {
    if !config.enabled {
        return Signal::flat(&config.symbol, &config.id);
    }

    match config.kind {
        StrategyKind::Rsi => evaluate_rsi(config, snapshots),
        StrategyKind::RsiMultiTimeframe => evaluate_rsi_mtf(config, snapshots),
        StrategyKind::VolumeFilter => evaluate_volume_filter(config, snapshots),
        StrategyKind::Advanced => evaluate_advanced(config, snapshots),
        // Grid and DCA entries are generated by the grid engine; Manual
        // only accepts explicit user orders.
        StrategyKind::Grid | StrategyKind::Dca | StrategyKind::Manual => {
            Signal::flat(&config.symbol, &config.id)
        }
    }
}

fn evaluate_rsi(config: &StrategyConfig, snapshots: &HashMap<Timeframe, IndicatorSnapshot>) -> Signal {
    let Some(rsi) = snapshots.get(&config.timeframe).and_then(|s| s.rsi) else {
        return Signal::flat(&config.symbol, &config.id);
    };

    direction_from_rsi(config, rsi)
        .map(|dir| signal_from_rsi(config, dir, rsi))
        .unwrap_or_else(|| Signal::flat(&config.symbol, &config.id))
}

fn evaluate_rsi_mtf(
    config: &StrategyConfig,
    snapshots: &HashMap<Timeframe, IndicatorSnapshot>,
) -> Signal {
    let fast = snapshots.get(&config.timeframe).and_then(|s| s.rsi);
    let slow = snapshots.get(&config.higher_timeframe).and_then(|s| s.rsi);
    let (Some(fast), Some(slow)) = (fast, slow) else {
        return Signal::flat(&config.symbol, &config.id);
    };

    let long = fast < config.oversold && slow < config.trend_midline;
    let short = fast > config.overbought && slow > config.trend_midline;

    match (long, short) {
        (true, false) => signal_from_rsi(config, Direction::Long, fast),
        (false, true) => signal_from_rsi(config, Direction::Short, fast),
        (true, true) => {
            warn!(
                strategy = %config.id,
                "long and short conditions held simultaneously, check thresholds"
            );
            Signal::flat(&config.symbol, &config.id)
        }
        (false, false) => Signal::flat(&config.symbol, &config.id),
    }
}

fn evaluate_volume_filter(
    config: &StrategyConfig,
    snapshots: &HashMap<Timeframe, IndicatorSnapshot>,
) -> Signal {
    let Some(snapshot) = snapshots.get(&config.timeframe) else {
        return Signal::flat(&config.symbol, &config.id);
    };
    let (Some(rsi), Some(baseline), Some(volume)) =
        (snapshot.rsi, snapshot.volume_ema, snapshot.last_volume)
    else {
        return Signal::flat(&config.symbol, &config.id);
    };

    if !VolumeEma::is_surge(volume, baseline, config.volume_multiplier) {
        return Signal::flat(&config.symbol, &config.id);
    }

    direction_from_rsi(config, rsi)
        .map(|dir| signal_from_rsi(config, dir, rsi))
        .unwrap_or_else(|| Signal::flat(&config.symbol, &config.id))
}

fn evaluate_advanced(
    config: &StrategyConfig,
    snapshots: &HashMap<Timeframe, IndicatorSnapshot>,
) -> Signal {
    let Some(snapshot) = snapshots.get(&config.timeframe) else {
        return Signal::flat(&config.symbol, &config.id);
    };
    let (Some(rsi), Some(macd), Some(baseline), Some(volume), Some(pattern)) = (
        snapshot.rsi,
        snapshot.macd,
        snapshot.volume_ema,
        snapshot.last_volume,
        snapshot.pattern,
    ) else {
        return Signal::flat(&config.symbol, &config.id);
    };

    if !VolumeEma::is_surge(volume, baseline, config.volume_multiplier) {
        return Signal::flat(&config.symbol, &config.id);
    }

    // All four gates must agree; the MACD histogram and pattern gates
    // accept neutral.
    let long = rsi < config.oversold && macd.histogram >= 0.0 && !pattern.is_bearish();
    let short = rsi > config.overbought && macd.histogram <= 0.0 && !pattern.is_bullish();

    match (long, short) {
        (true, false) => signal_from_rsi(config, Direction::Long, rsi),
        (false, true) => signal_from_rsi(config, Direction::Short, rsi),
        (true, true) => {
            warn!(
                strategy = %config.id,
                "long and short conditions held simultaneously, check thresholds"
            );
            Signal::flat(&config.symbol, &config.id)
        }
        (false, false) => Signal::flat(&config.symbol, &config.id),
    }
}

fn direction_from_rsi(config: &StrategyConfig, rsi: f64) -> Option<Direction> {
    if rsi < config.oversold {
        Some(Direction::Long)
    } else if rsi > config.overbought {
        Some(Direction::Short)
    } else {
        None
    }
}

/// Grade conviction by how deep the RSI sits beyond its threshold.
fn signal_from_rsi(config: &StrategyConfig, direction: Direction, rsi: f64) -> Signal {
    let depth = match direction {
        Direction::Long => config.oversold - rsi,
        Direction::Short => rsi - config.overbought,
        Direction::Flat => 0.0,
    };

    let (strength, confidence) = if depth >= 10.0 {
        (SignalStrength::Strong, 0.9)
    } else if depth >= 5.0 {
        (SignalStrength::Moderate, 0.7)
    } else {
        (SignalStrength::Weak, 0.5)
    };

    Signal::entry(&config.symbol, direction, strength, confidence, &config.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridbot_core::types::Timeframe;
    use gridbot_indicators::{CandlePattern, MacdOutput};

    fn config(kind: StrategyKind) -> StrategyConfig {
        StrategyConfig::new("test", kind, "BTC_USDT")
    }

    fn snapshot_with_rsi(rsi: Option<f64>) -> IndicatorSnapshot {
        IndicatorSnapshot {
            rsi,
            ..Default::default()
        }
    }

    fn snapshots(entries: Vec<(Timeframe, IndicatorSnapshot)>) -> HashMap<Timeframe, IndicatorSnapshot> {
        entries.into_iter().collect()
    }

    #[test]
    fn test_rsi_long_short_flat() {
        let config = config(StrategyKind::Rsi);

        let long = evaluate(
            &config,
            &snapshots(vec![(Timeframe::Minute5, snapshot_with_rsi(Some(25.0)))]),
        );
        assert_eq!(long.direction, Direction::Long);

        let short = evaluate(
            &config,
            &snapshots(vec![(Timeframe::Minute5, snapshot_with_rsi(Some(75.0)))]),
        );
        assert_eq!(short.direction, Direction::Short);

        let flat = evaluate(
            &config,
            &snapshots(vec![(Timeframe::Minute5, snapshot_with_rsi(Some(50.0)))]),
        );
        assert_eq!(flat.direction, Direction::Flat);
    }

    #[test]
    fn test_undefined_rsi_is_flat() {
        let config = config(StrategyKind::Rsi);
        let signal = evaluate(
            &config,
            &snapshots(vec![(Timeframe::Minute5, snapshot_with_rsi(None))]),
        );
        assert_eq!(signal.direction, Direction::Flat);

        // Missing snapshot entirely.
        let signal = evaluate(&config, &HashMap::new());
        assert_eq!(signal.direction, Direction::Flat);
    }

    #[test]
    fn test_mtf_long() {
        let config = config(StrategyKind::RsiMultiTimeframe);
        let signal = evaluate(
            &config,
            &snapshots(vec![
                (Timeframe::Minute5, snapshot_with_rsi(Some(25.0))),
                (Timeframe::Hour1, snapshot_with_rsi(Some(40.0))),
            ]),
        );
        assert_eq!(signal.direction, Direction::Long);
    }

    #[test]
    fn test_mtf_short() {
        let config = config(StrategyKind::RsiMultiTimeframe);
        let signal = evaluate(
            &config,
            &snapshots(vec![
                (Timeframe::Minute5, snapshot_with_rsi(Some(75.0))),
                (Timeframe::Hour1, snapshot_with_rsi(Some(60.0))),
            ]),
        );
        assert_eq!(signal.direction, Direction::Short);
    }

    #[test]
    fn test_mtf_higher_timeframe_vetoes() {
        let config = config(StrategyKind::RsiMultiTimeframe);
        let signal = evaluate(
            &config,
            &snapshots(vec![
                (Timeframe::Minute5, snapshot_with_rsi(Some(25.0))),
                (Timeframe::Hour1, snapshot_with_rsi(Some(55.0))),
            ]),
        );
        assert_eq!(signal.direction, Direction::Flat);
    }

    #[test]
    fn test_mtf_missing_higher_timeframe_is_flat() {
        let config = config(StrategyKind::RsiMultiTimeframe);
        let signal = evaluate(
            &config,
            &snapshots(vec![(Timeframe::Minute5, snapshot_with_rsi(Some(25.0)))]),
        );
        assert_eq!(signal.direction, Direction::Flat);
    }

    #[test]
    fn test_volume_filter_gates_rsi() {
        let config = config(StrategyKind::VolumeFilter);

        let surge = IndicatorSnapshot {
            rsi: Some(20.0),
            volume_ema: Some(50.0),
            last_volume: Some(100.0),
            ..Default::default()
        };
        let signal = evaluate(&config, &snapshots(vec![(Timeframe::Minute5, surge)]));
        // 100 > 1.5 * 50
        assert_eq!(signal.direction, Direction::Long);

        let quiet = IndicatorSnapshot {
            rsi: Some(20.0),
            volume_ema: Some(50.0),
            last_volume: Some(60.0),
            ..Default::default()
        };
        let signal = evaluate(&config, &snapshots(vec![(Timeframe::Minute5, quiet)]));
        assert_eq!(signal.direction, Direction::Flat);
    }

    fn advanced_snapshot(rsi: f64, histogram: f64, pattern: CandlePattern) -> IndicatorSnapshot {
        IndicatorSnapshot {
            rsi: Some(rsi),
            macd: Some(MacdOutput {
                macd: 0.0,
                signal: 0.0,
                histogram,
            }),
            volume_ema: Some(50.0),
            last_volume: Some(100.0),
            pattern: Some(pattern),
            ..Default::default()
        }
    }

    #[test]
    fn test_advanced_all_gates_long() {
        let config = config(StrategyKind::Advanced);
        let signal = evaluate(
            &config,
            &snapshots(vec![(
                Timeframe::Minute5,
                advanced_snapshot(25.0, 0.5, CandlePattern::Hammer),
            )]),
        );
        assert_eq!(signal.direction, Direction::Long);
    }

    #[test]
    fn test_advanced_neutral_gates_still_long() {
        let config = config(StrategyKind::Advanced);
        let signal = evaluate(
            &config,
            &snapshots(vec![(
                Timeframe::Minute5,
                advanced_snapshot(25.0, 0.0, CandlePattern::None),
            )]),
        );
        assert_eq!(signal.direction, Direction::Long);
    }

    #[test]
    fn test_advanced_bearish_pattern_vetoes_long() {
        let config = config(StrategyKind::Advanced);
        let signal = evaluate(
            &config,
            &snapshots(vec![(
                Timeframe::Minute5,
                advanced_snapshot(25.0, 0.5, CandlePattern::ShootingStar),
            )]),
        );
        assert_eq!(signal.direction, Direction::Flat);
    }

    #[test]
    fn test_advanced_negative_histogram_vetoes_long() {
        let config = config(StrategyKind::Advanced);
        let signal = evaluate(
            &config,
            &snapshots(vec![(
                Timeframe::Minute5,
                advanced_snapshot(25.0, -0.5, CandlePattern::None),
            )]),
        );
        assert_eq!(signal.direction, Direction::Flat);
    }

    #[test]
    fn test_advanced_short() {
        let config = config(StrategyKind::Advanced);
        let signal = evaluate(
            &config,
            &snapshots(vec![(
                Timeframe::Minute5,
                advanced_snapshot(78.0, -0.5, CandlePattern::BearishEngulfing),
            )]),
        );
        assert_eq!(signal.direction, Direction::Short);
    }

    #[test]
    fn test_passive_kinds_always_flat() {
        let full = advanced_snapshot(20.0, 0.5, CandlePattern::Hammer);
        for kind in [StrategyKind::Grid, StrategyKind::Dca, StrategyKind::Manual] {
            let mut config = config(kind);
            // Passive kinds stay flat even with screaming indicators.
            config.grid = None;
            config.dca = None;
            let signal = evaluate(
                &config,
                &snapshots(vec![(Timeframe::Minute5, full.clone())]),
            );
            assert_eq!(signal.direction, Direction::Flat);
        }
    }

    #[test]
    fn test_disabled_strategy_is_flat() {
        let mut config = config(StrategyKind::Rsi);
        config.enabled = false;
        let signal = evaluate(
            &config,
            &snapshots(vec![(Timeframe::Minute5, snapshot_with_rsi(Some(10.0)))]),
        );
        assert_eq!(signal.direction, Direction::Flat);
    }

    #[test]
    fn test_strength_scales_with_depth() {
        let config = config(StrategyKind::Rsi);

        let weak = evaluate(
            &config,
            &snapshots(vec![(Timeframe::Minute5, snapshot_with_rsi(Some(28.0)))]),
        );
        assert_eq!(weak.strength, SignalStrength::Weak);

        let strong = evaluate(
            &config,
            &snapshots(vec![(Timeframe::Minute5, snapshot_with_rsi(Some(15.0)))]),
        );
        assert_eq!(strong.strength, SignalStrength::Strong);
        assert!(strong.confidence > weak.confidence);
    }
}
