//! Live trading command implementation.

use anyhow::{Context, Result};
use gridbot_config::{load_config, resolve_credentials};
use gridbot_engine::{JsonFileStore, StopMode, TradingEngine};
use gridbot_exchange::{ApiCredentials, MarketDataFeed, RestExchange, Subscription};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{error, info};

use crate::cli::LiveArgs;

pub async fn run(args: LiveArgs, config_path: &Path) -> Result<()> {
    let config = load_config(config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    let (api_key, secret) = resolve_credentials(&config.exchange)?;

    let exchange = Arc::new(RestExchange::new(
        &config.exchange.base_url,
        ApiCredentials::new(api_key, secret),
    )?);

    let store = Arc::new(
        JsonFileStore::open(&config.engine.data_dir).context("failed to open data directory")?,
    );

    let mut engine = TradingEngine::new(
        exchange,
        config.strategies.clone(),
        config.risk.clone(),
        config.liquidation,
    )
    .with_store(store);
    engine.warm_up().await?;

    let subscriptions: Vec<Subscription> = engine
        .subscriptions()
        .into_iter()
        .map(|(symbol, timeframe)| Subscription { symbol, timeframe })
        .collect();
    info!(count = subscriptions.len(), "starting live trading");

    let (feed_tx, feed_rx) = mpsc::channel(1024);
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

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            let _ = shutdown_tx.send(true);
        }
    });

    let stop_mode = if args.cancel_all_on_exit {
        StopMode::CancelAll
    } else {
        StopMode::KeepProtectiveOrders
    };
    engine.run(feed_rx, shutdown_rx, stop_mode).await?;
    feed_task.await?;

    info!("live trading stopped");
    Ok(())
}
