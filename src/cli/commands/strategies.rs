//! List strategy kinds.

use anyhow::Result;
use gridbot_strategies::StrategyKind;

pub async fn run() -> Result<()> {
    let kinds: [(StrategyKind, &str, &str); 7] = [
        (
            StrategyKind::Rsi,
            "rsi",
            "RSI overbought/oversold on a single timeframe",
        ),
        (
            StrategyKind::RsiMultiTimeframe,
            "rsi_multi_timeframe",
            "RSI entries confirmed by the higher-timeframe trend",
        ),
        (
            StrategyKind::VolumeFilter,
            "volume_filter",
            "RSI entries gated by a volume surge over the volume EMA",
        ),
        (
            StrategyKind::Advanced,
            "advanced",
            "RSI + MACD + volume + candlestick pattern, all gates required",
        ),
        (
            StrategyKind::Grid,
            "grid",
            "Resting limit-order ladder; filled rungs recycle to the opposite side",
        ),
        (
            StrategyKind::Dca,
            "dca",
            "Fixed-amount purchase on a fixed schedule",
        ),
        (
            StrategyKind::Manual,
            "manual",
            "User-submitted orders only; no signal evaluation",
        ),
    ];

    println!("Strategy kinds");
    println!("═══════════════════════════════════════════════════════════");
    println!();
    for (kind, name, description) in kinds {
        let driven = if kind.is_indicator_driven() {
            "indicator-driven"
        } else {
            "scheduled/manual"
        };
        println!("  {name}  ({driven})");
        println!("  {description}");
        println!();
    }
    println!("Configure instances under [[strategies]] in the config file.");

    Ok(())
}
