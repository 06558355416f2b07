//! Paper trading: live market data, simulated execution.

use anyhow::{Context, Result};
use gridbot_config::load_config;
use gridbot_engine::{JsonFileStore, StopMode, TradingEngine};
use gridbot_exchange::{
    ApiCredentials, CsvCandleSource, FeedEvent, MarketDataFeed, RestExchange, SimExchange,
    Subscription,
};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use crate::cli::PaperArgs;

const HISTORY_SEED: usize = 200;

pub async fn run(args: PaperArgs, config_path: &Path) -> Result<()> {
    let config = load_config(config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;

    let balance = args
        .balance
        .and_then(Decimal::from_f64)
        .unwrap_or(config.engine.paper_balance);
    let sim = Arc::new(SimExchange::new(balance));

    let store = Arc::new(
        JsonFileStore::open(&config.engine.data_dir).context("failed to open data directory")?,
    );

    let mut engine = TradingEngine::new(
        sim.clone(),
        config.strategies.clone(),
        config.risk.clone(),
        config.liquidation,
    )
    .with_store(store);

    // Public market-data endpoints need no credentials; the simulator
    // serves them back to the engine during warm-up. With --replay-dir
    // the history comes from CSV files instead.
    let market = RestExchange::new(&config.exchange.base_url, ApiCredentials::new("", ""))?;
    for (symbol, timeframe) in engine.subscriptions() {
        use gridbot_core::traits::Exchange;
        let candles = match &args.replay_dir {
            Some(dir) => {
                let path = dir.join(format!("{symbol}_{timeframe}.csv"));
                let source = CsvCandleSource::new(&path.to_string_lossy())
                    .with_context(|| format!("missing replay file {}", path.display()))?;
                source
                    .load_all()
                    .with_context(|| format!("failed to read {}", path.display()))?
            }
            None => market.candles(&symbol, timeframe, HISTORY_SEED).await?,
        };
        if let Some(last) = candles.last().and_then(|c| Decimal::from_f64(c.close)) {
            sim.post_price(&symbol, last);
        }
        sim.seed_candles(&symbol, timeframe, candles);
    }
    engine.warm_up().await?;

    let subscriptions: Vec<Subscription> = engine
        .subscriptions()
        .into_iter()
        .map(|(symbol, timeframe)| Subscription { symbol, timeframe })
        .collect();
    info!(%balance, count = subscriptions.len(), "starting paper trading");

    let (feed_tx, mut feed_rx) = mpsc::channel::<FeedEvent>(1024);
    let (engine_tx, engine_rx) = mpsc::channel::<FeedEvent>(1024);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut feed = MarketDataFeed::new(
        &config.exchange.ws_url,
        subscriptions,
        feed_tx,
        shutdown_rx.clone(),
    );
    let feed_task = tokio::spawn(async move {
        if let Err(e) = feed.run().await {
            error!(error = %e, "market data feed stopped");
        }
    });

    // Mirror live prices into the simulator so resting orders cross,
    // then hand each event to the engine. Exchange fills replace the
    // stream's own fill events in paper mode.
    let mut sim_fills = sim.fill_events();
    let bridge_sim = sim.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                event = feed_rx.recv() => {
                    let Some(event) = event else { break };
                    match event {
                        FeedEvent::Ticker(ref ticker) => {
                            if let Some(price) = Decimal::from_f64(ticker.last) {
                                bridge_sim.post_price(&ticker.symbol, price);
                            }
                        }
                        FeedEvent::Fill(_) => continue,
                        _ => {}
                    }
                    if engine_tx.send(event).await.is_err() {
                        break;
                    }
                }
                fill = sim_fills.recv() => {
                    let Some(fill) = fill else { break };
                    if engine_tx.send(FeedEvent::Fill(fill)).await.is_err() {
                        break;
                    }
                }
            }
        }
        warn!("paper feed bridge stopped");
    });

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            let _ = shutdown_tx.send(true);
        }
    });

    engine
        .run(engine_rx, shutdown_rx, StopMode::CancelAll)
        .await?;
    feed_task.await?;

    info!("paper trading stopped");
    Ok(())
}
