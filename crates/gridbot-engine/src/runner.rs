//! The trading engine loop.
//!
//! One engine instance owns all per-symbol state and consumes feed
//! events strictly in arrival order, so signal evaluation, risk checks
//! and order submission for a symbol never interleave.

use chrono::Utc;
use gridbot_core::error::EngineError;
use gridbot_core::traits::Exchange;
use gridbot_core::types::{
    AppendOutcome, Direction, OrderRequest, OrderType, Signal, SignalStrength, Timeframe,
};
use gridbot_exchange::FeedEvent;
use gridbot_indicators::{IndicatorEngine, IndicatorParams};
use gridbot_risk::{
    DynamicLimits, LiquidationMonitor, LiquidationThresholds, RiskDecision, RiskEvent, RiskManager,
    RiskSettings,
};
use gridbot_strategies::{evaluate, StrategyConfig, StrategyKind};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{error, info, warn};

use crate::events::{EngineEvent, EventBus, PortfolioSnapshot};
use crate::executor::OrderExecutor;
use crate::grid::GridEngine;
use crate::persistence::TradeStore;
use crate::tracker::PositionTracker;

const HISTORY_SEED: usize = 200;

/// What to do with resting orders on shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMode {
    /// Cancel working entries but leave stops and take-profits resting,
    /// so open positions stay protected after the process exits.
    KeepProtectiveOrders,
    /// Cancel everything.
    CancelAll,
}

/// The engine: consumes feed events, evaluates strategies, routes
/// approved orders and keeps positions protected.
pub struct TradingEngine {
    exchange: Arc<dyn Exchange>,
    executor: Arc<OrderExecutor>,
    indicators: IndicatorEngine,
    configs: Vec<StrategyConfig>,
    risk: RiskManager,
    liquidation: LiquidationMonitor,
    tracker: PositionTracker,
    grid: GridEngine,
    events: EventBus,
    events_rx: broadcast::Receiver<EngineEvent>,
    store: Option<Arc<dyn TradeStore>>,
    prices: HashMap<String, Decimal>,
    evaluation_enabled: bool,
    closed_trades: u64,
    winning_trades: u64,
}

impl TradingEngine {
    pub fn new(
        exchange: Arc<dyn Exchange>,
        configs: Vec<StrategyConfig>,
        settings: RiskSettings,
        thresholds: LiquidationThresholds,
    ) -> Self {
        let executor = Arc::new(OrderExecutor::new(exchange.clone()));
        let risk = RiskManager::new(settings);
        let events = EventBus::default();
        let events_rx = events.subscribe();
        let tracker = PositionTracker::new(risk.clone(), executor.clone(), events.clone());
        let grid = GridEngine::new(executor.clone(), risk.clone());

        let params = IndicatorParams::default();
        Self {
            exchange,
            executor,
            indicators: IndicatorEngine::new(params, 500),
            configs,
            risk,
            liquidation: LiquidationMonitor::new(thresholds),
            tracker,
            grid,
            events,
            events_rx,
            store: None,
            prices: HashMap::new(),
            evaluation_enabled: true,
            closed_trades: 0,
            winning_trades: 0,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn TradeStore>) -> Self {
        let tracker = self.tracker;
        self.tracker = tracker.with_store(store.clone());
        self.store = Some(store);
        self
    }

    /// Event bus handle for UI and monitoring subscribers.
    pub fn events(&self) -> EventBus {
        self.events.clone()
    }

    /// The (symbol, timeframe) pairs the feed must subscribe to.
    pub fn subscriptions(&self) -> Vec<(String, Timeframe)> {
        let mut pairs = Vec::new();
        for config in self.configs.iter().filter(|c| c.enabled) {
            pairs.push((config.symbol.clone(), config.timeframe));
            if config.kind == StrategyKind::RsiMultiTimeframe {
                pairs.push((config.symbol.clone(), config.higher_timeframe));
            }
        }
        pairs.sort();
        pairs.dedup();
        pairs
    }

    /// Seed indicator history, apply leverage, and start the grid and
    /// DCA strategies. Must run before the feed loop.
    pub async fn warm_up(&mut self) -> Result<(), EngineError> {
        for (symbol, timeframe) in self.subscriptions() {
            let candles = self.exchange.candles(&symbol, timeframe, HISTORY_SEED).await?;
            info!(%symbol, %timeframe, count = candles.len(), "seeded candle history");
            self.indicators.seed(&symbol, timeframe, candles);
        }

        for config in self.configs.iter().filter(|c| c.enabled) {
            if config.leverage > 1 {
                self.exchange
                    .set_leverage(&config.symbol, config.leverage)
                    .await?;
            }
        }

        let balance = self.exchange.free_balance().await?;
        let limits = DynamicLimits::from_balance(balance);

        let configs = self.configs.clone();
        for config in configs.iter().filter(|c| c.enabled) {
            match config.kind {
                StrategyKind::Grid => {
                    let ticker = self.exchange.ticker(&config.symbol).await?;
                    let Some(reference) = Decimal::from_f64(ticker.last) else {
                        continue;
                    };
                    self.prices.insert(config.symbol.clone(), reference);
                    // Rung fills must end up protected like any other
                    // entry; the ladder context resolves stop levels
                    // against each fill's actual price.
                    self.tracker.register_ladder_entry(
                        &config.symbol,
                        &config.id,
                        config.leverage,
                        config.stop_loss_pct,
                        config.take_profit_pct,
                        config.trailing_pct,
                    );
                    self.grid.start_grid(config, reference, &limits).await?;
                }
                StrategyKind::Dca => self.grid.schedule_dca(config)?,
                _ => {}
            }
        }
        Ok(())
    }

    /// Consume feed events until shutdown, then wind down per `stop_mode`.
    pub async fn run(
        &mut self,
        mut feed: mpsc::Receiver<FeedEvent>,
        mut shutdown: watch::Receiver<bool>,
        stop_mode: StopMode,
    ) -> Result<(), EngineError> {
        let mut timer = tokio::time::interval(Duration::from_secs(60));
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                event = feed.recv() => {
                    let Some(event) = event else { break };
                    if let Err(e) = self.handle_event(event).await {
                        self.handle_error(e).await;
                    }
                }
                _ = timer.tick() => {
                    if let Err(e) = self.on_timer().await {
                        self.handle_error(e).await;
                    }
                }
            }
        }

        self.shutdown(stop_mode).await
    }

    /// Dispatch one feed event.
    pub async fn handle_event(&mut self, event: FeedEvent) -> Result<(), EngineError> {
        match event {
            FeedEvent::Candle {
                symbol,
                timeframe,
                candle,
            } => {
                if !candle.closed {
                    return Ok(());
                }
                if let Some(close) = Decimal::from_f64(candle.close) {
                    self.prices.insert(symbol.clone(), close);
                }
                let outcome = self.indicators.on_closed_candle(&symbol, timeframe, candle);
                if let AppendOutcome::Gap { .. } = outcome {
                    // Refetch history; the snapshot stays invalid until
                    // the series is whole again.
                    let candles = self.exchange.candles(&symbol, timeframe, HISTORY_SEED).await?;
                    self.indicators.seed(&symbol, timeframe, candles);
                }
                self.evaluate_symbol(&symbol).await
            }
            FeedEvent::Ticker(ticker) => {
                let Some(price) = Decimal::from_f64(ticker.last) else {
                    return Ok(());
                };
                self.prices.insert(ticker.symbol.clone(), price);
                self.tracker.on_price(&ticker.symbol, price).await?;
                self.check_liquidation().await
            }
            FeedEvent::Fill(fill) => {
                if let Some(client_id) = self.executor.client_id_for(&fill.order_id) {
                    self.grid.on_order_filled(&client_id).await?;
                }
                self.tracker.on_fill(fill).await
            }
            FeedEvent::Reconcile => self.reconcile().await,
        }
    }

    /// Evaluate every enabled indicator strategy on `symbol` and route
    /// approved entries.
    async fn evaluate_symbol(&mut self, symbol: &str) -> Result<(), EngineError> {
        if !self.evaluation_enabled {
            return Ok(());
        }
        let Some(price) = self.prices.get(symbol).copied() else {
            return Ok(());
        };
        let Some(snapshots) = self.indicators.snapshots(symbol).cloned() else {
            return Ok(());
        };

        let configs: Vec<StrategyConfig> = self
            .configs
            .iter()
            .filter(|c| c.enabled && c.symbol == symbol && c.kind.is_indicator_driven())
            .cloned()
            .collect();
        if configs.is_empty() {
            return Ok(());
        }

        let account = self.exchange.account().await?;

        for config in configs {
            let signal = evaluate(&config, &snapshots);
            if signal.direction == Direction::Flat {
                continue;
            }
            self.events.publish(EngineEvent::Signal(signal.clone()));

            match self.risk.evaluate_signal(&account, &config, &signal, price) {
                RiskDecision::Approved { order, stops } => {
                    info!(
                        strategy = %config.id,
                        %symbol,
                        side = %order.side,
                        quantity = %order.quantity,
                        "entry approved"
                    );
                    self.tracker
                        .register_entry(symbol, &config.id, config.leverage, stops);
                    self.executor.submit(order).await?;
                }
                RiskDecision::Rejected { reason } => {
                    info!(strategy = %config.id, %symbol, %reason, "entry rejected");
                }
            }
        }
        Ok(())
    }

    /// User-initiated entry for a `Manual` strategy. The order goes
    /// through the same risk evaluation and stop attachment as any
    /// signal-driven entry; the caller gets the decision back.
    pub async fn submit_manual(
        &mut self,
        strategy_id: &str,
        direction: Direction,
    ) -> Result<RiskDecision, EngineError> {
        let Some(config) = self
            .configs
            .iter()
            .find(|c| c.enabled && c.id == strategy_id && c.kind == StrategyKind::Manual)
            .cloned()
        else {
            return Err(EngineError::Config(format!(
                "no enabled manual strategy '{strategy_id}'"
            )));
        };

        let price = match self.prices.get(&config.symbol).copied() {
            Some(price) => price,
            None => {
                let ticker = self.exchange.ticker(&config.symbol).await?;
                Decimal::from_f64(ticker.last).ok_or_else(|| {
                    EngineError::Config(format!("no usable price for {}", config.symbol))
                })?
            }
        };

        let signal = Signal::entry(
            &config.symbol,
            direction,
            SignalStrength::Strong,
            1.0,
            "manual",
        );
        self.events.publish(EngineEvent::Signal(signal.clone()));

        let account = self.exchange.account().await?;
        let decision = self.risk.evaluate_signal(&account, &config, &signal, price);
        if let RiskDecision::Approved { order, stops } = &decision {
            info!(
                strategy = %config.id,
                symbol = %config.symbol,
                side = %order.side,
                quantity = %order.quantity,
                "manual entry approved"
            );
            self.tracker
                .register_entry(&config.symbol, &config.id, config.leverage, *stops);
            self.executor.submit(order.clone()).await?;
        }
        Ok(decision)
    }

    /// Grade every open position against its liquidation price and
    /// de-risk the ones inside the emergency band.
    async fn check_liquidation(&mut self) -> Result<(), EngineError> {
        let mut pending: Vec<(RiskEvent, gridbot_core::types::Side)> = Vec::new();
        for position in self.tracker.open_positions() {
            if let Some(event) = self.liquidation.check(position) {
                pending.push((event, position.side));
            }
        }

        for (event, side) in pending {
            self.events.publish(EngineEvent::Risk(event.clone()));
            if let RiskEvent::DeRisk {
                symbol,
                close_quantity,
                ..
            } = event
            {
                let mut request = OrderRequest::market(&symbol, side.opposite(), close_quantity);
                request.reduce_only = true;
                warn!(%symbol, quantity = %close_quantity, "de-risking position near liquidation");
                self.executor.submit(request).await?;
            }
        }
        Ok(())
    }

    /// Periodic work: DCA purchases and the portfolio snapshot.
    async fn on_timer(&mut self) -> Result<(), EngineError> {
        if self.evaluation_enabled {
            let configs = self.configs.clone();
            self.grid.poll_dca(&configs, &self.prices, Utc::now()).await?;
        }
        self.publish_snapshot().await
    }

    async fn publish_snapshot(&mut self) -> Result<(), EngineError> {
        // Drain our own event mirror to keep the win counters current.
        loop {
            match self.events_rx.try_recv() {
                Ok(EngineEvent::PositionClosed(position)) => {
                    self.closed_trades += 1;
                    if position.realized_pnl > Decimal::ZERO {
                        self.winning_trades += 1;
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "event mirror lagged, win counters undercount");
                }
                Err(_) => break,
            }
        }

        let account = self.exchange.account().await?;
        let unrealized: Decimal = self.tracker.open_positions().map(|p| p.unrealized_pnl).sum();
        let realized: Decimal = self.tracker.open_positions().map(|p| p.realized_pnl).sum();

        let win_rate = if self.closed_trades > 0 {
            Some(self.winning_trades as f64 / self.closed_trades as f64)
        } else {
            None
        };

        let snapshot = PortfolioSnapshot {
            balance: account.balance,
            equity: account.equity,
            total_unrealized_pnl: unrealized,
            total_realized_pnl: realized,
            open_positions: self.tracker.open_positions().count(),
            win_rate,
            timestamp: Utc::now(),
        };

        if let Some(store) = &self.store {
            if let Err(e) = store.write_snapshot(&snapshot).await {
                warn!(error = %e, "failed to persist portfolio snapshot");
            }
        }
        self.events.publish(EngineEvent::Portfolio(snapshot));
        Ok(())
    }

    /// Replace local state from the exchange after any stream break.
    async fn reconcile(&mut self) -> Result<(), EngineError> {
        let positions = self.exchange.positions().await?;
        let open_orders = self.exchange.open_orders(None).await?;
        self.tracker.reconcile(positions, open_orders).await?;

        for (symbol, timeframe) in self.subscriptions() {
            let candles = self.exchange.candles(&symbol, timeframe, HISTORY_SEED).await?;
            self.indicators.seed(&symbol, timeframe, candles);
        }
        Ok(())
    }

    async fn handle_error(&mut self, error: EngineError) {
        match error {
            // Unknown submission outcome: the exchange is the only
            // source of truth now.
            EngineError::ExecutionFatal(reason) => {
                error!(%reason, "execution in unknown state, forcing reconciliation");
                if let Err(e) = self.reconcile().await {
                    error!(error = %e, "reconciliation failed");
                }
            }
            e => error!(error = %e, "engine event failed"),
        }
    }

    /// Wind down: stop evaluating, then dispose of resting orders.
    pub async fn shutdown(&mut self, mode: StopMode) -> Result<(), EngineError> {
        self.evaluation_enabled = false;
        info!(?mode, "engine shutting down");

        match mode {
            StopMode::CancelAll => {
                self.exchange.cancel_all_orders(None).await?;
            }
            StopMode::KeepProtectiveOrders => {
                for order in self.exchange.open_orders(None).await? {
                    if matches!(order.order_type, OrderType::Stop | OrderType::TakeProfit) {
                        continue;
                    }
                    self.executor.cancel(&order.symbol, &order.id).await?;
                }
            }
        }
        self.publish_snapshot().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridbot_core::types::{Candle, Side};
    use gridbot_exchange::SimExchange;
    use rust_decimal_macros::dec;

    fn rsi_config() -> StrategyConfig {
        StrategyConfig::new("rsi-btc", StrategyKind::Rsi, "BTC_USDT")
    }

    fn candle(open_time: i64, close: f64) -> Candle {
        let mut c = Candle::new(open_time, close, close + 10.0, close - 10.0, close, 1000.0);
        c.closed = true;
        c
    }

    fn falling_history(n: usize) -> Vec<Candle> {
        // Monotonic decline drives RSI to the floor.
        (0..n)
            .map(|i| candle(i as i64 * 300_000, 31000.0 - i as f64 * 50.0))
            .collect()
    }

    async fn engine_with_sim() -> (TradingEngine, Arc<SimExchange>) {
        let sim = Arc::new(SimExchange::new(dec!(100000)));
        sim.post_price("BTC_USDT", dec!(30000));
        let engine = TradingEngine::new(
            sim.clone(),
            vec![rsi_config()],
            RiskSettings::default(),
            LiquidationThresholds::default(),
        );
        (engine, sim)
    }

    #[tokio::test]
    async fn test_oversold_candle_opens_position() {
        let (mut engine, sim) = engine_with_sim().await;
        let history = falling_history(60);
        sim.seed_candles("BTC_USDT", Timeframe::Minute5, history.clone());
        engine.warm_up().await.unwrap();

        let next = candle(60 * 300_000, 31000.0 - 60.0 * 50.0);
        engine
            .handle_event(FeedEvent::Candle {
                symbol: "BTC_USDT".into(),
                timeframe: Timeframe::Minute5,
                candle: next,
            })
            .await
            .unwrap();

        // The approved entry is a market buy; the sim fills it at once.
        let positions = sim.positions().await.unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].side, Side::Buy);
    }

    #[tokio::test]
    async fn test_evaluation_disabled_after_shutdown() {
        let (mut engine, sim) = engine_with_sim().await;
        sim.seed_candles("BTC_USDT", Timeframe::Minute5, falling_history(60));
        engine.warm_up().await.unwrap();
        engine.shutdown(StopMode::CancelAll).await.unwrap();

        engine
            .handle_event(FeedEvent::Candle {
                symbol: "BTC_USDT".into(),
                timeframe: Timeframe::Minute5,
                candle: candle(60 * 300_000, 31000.0 - 60.0 * 50.0),
            })
            .await
            .unwrap();

        assert!(sim.positions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reconcile_event_adopts_exchange_positions() {
        let (mut engine, sim) = engine_with_sim().await;
        sim.seed_candles("BTC_USDT", Timeframe::Minute5, falling_history(60));
        engine.warm_up().await.unwrap();

        // A position the engine never saw open.
        sim.submit_order(OrderRequest::market("BTC_USDT", Side::Buy, dec!(0.5)))
            .await
            .unwrap();

        engine.handle_event(FeedEvent::Reconcile).await.unwrap();
        assert!(engine.tracker.position("BTC_USDT").is_some());
    }

    #[tokio::test]
    async fn test_keep_protective_orders_on_shutdown() {
        let (mut engine, sim) = engine_with_sim().await;
        sim.seed_candles("BTC_USDT", Timeframe::Minute5, falling_history(60));
        engine.warm_up().await.unwrap();

        // One working limit entry, one protective stop.
        sim.submit_order(OrderRequest::limit("BTC_USDT", Side::Buy, dec!(0.1), dec!(25000)))
            .await
            .unwrap();
        sim.submit_order(OrderRequest::stop("BTC_USDT", Side::Sell, dec!(0.1), dec!(24000)))
            .await
            .unwrap();

        engine
            .shutdown(StopMode::KeepProtectiveOrders)
            .await
            .unwrap();

        let open = sim.open_orders(None).await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].order_type, OrderType::Stop);
    }

    #[tokio::test]
    async fn test_grid_rung_fill_gets_protective_stop() {
        let sim = Arc::new(SimExchange::new(dec!(100000)));
        sim.post_price("BTC_USDT", dec!(30000));

        let mut config = StrategyConfig::new("grid-btc", StrategyKind::Grid, "BTC_USDT");
        config.grid = Some(gridbot_strategies::GridParams {
            lower: dec!(29000),
            upper: dec!(31000),
            levels: 5,
            investment: dec!(1500),
            hedge_ratio: None,
        });
        let mut engine = TradingEngine::new(
            sim.clone(),
            vec![config],
            RiskSettings::default(),
            LiquidationThresholds::default(),
        );

        let mut fills = sim.fill_events();
        engine.warm_up().await.unwrap();

        // Drop through the 29500 buy rung and route the fill back.
        sim.post_price("BTC_USDT", dec!(29400));
        let fill = fills.recv().await.unwrap();
        engine.handle_event(FeedEvent::Fill(fill)).await.unwrap();

        // The rung position is protected at levels off its fill price.
        let position = engine.tracker.position("BTC_USDT").unwrap();
        assert!(position.protective.stop_loss_id.is_some());
        let open = sim.open_orders(Some("BTC_USDT")).await.unwrap();
        assert!(open.iter().any(|o| o.order_type == OrderType::Stop));
    }

    #[tokio::test]
    async fn test_manual_entry_routes_through_risk() {
        let sim = Arc::new(SimExchange::new(dec!(100000)));
        sim.post_price("BTC_USDT", dec!(30000));

        let config = StrategyConfig::new("manual-btc", StrategyKind::Manual, "BTC_USDT");
        let mut engine = TradingEngine::new(
            sim.clone(),
            vec![config],
            RiskSettings::default(),
            LiquidationThresholds::default(),
        );

        let decision = engine
            .submit_manual("manual-btc", Direction::Long)
            .await
            .unwrap();
        assert!(matches!(decision, RiskDecision::Approved { .. }));

        let positions = sim.positions().await.unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].side, Side::Buy);

        // An unknown strategy id is a config error, not a silent no-op.
        assert!(engine.submit_manual("missing", Direction::Long).await.is_err());
    }

    #[test]
    fn test_subscriptions_include_higher_timeframe() {
        let mut mtf = StrategyConfig::new("mtf-btc", StrategyKind::RsiMultiTimeframe, "BTC_USDT");
        mtf.higher_timeframe = Timeframe::Hour1;

        let sim = Arc::new(SimExchange::new(dec!(1000)));
        let engine = TradingEngine::new(
            sim,
            vec![mtf],
            RiskSettings::default(),
            LiquidationThresholds::default(),
        );
        let subs = engine.subscriptions();
        assert!(subs.contains(&("BTC_USDT".into(), Timeframe::Minute5)));
        assert!(subs.contains(&("BTC_USDT".into(), Timeframe::Hour1)));
    }
}
