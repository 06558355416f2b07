//! Position tracking.
//!
//! The tracker is the sole owner of live position state. Fills reach it
//! through per-symbol resequencers, every open position is kept
//! protected by a stop-loss, and `reconcile` replaces local state from
//! an exchange snapshot whenever the stream cannot be trusted.

use gridbot_core::error::EngineError;
use gridbot_core::types::{Fill, Order, OrderType, Position, Side};
use gridbot_exchange::Resequencer;
use gridbot_risk::{compute_stop_levels, RiskManager, StopLevels, TrailingAction, TrailingStop};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::events::{EngineEvent, EventBus};
use crate::executor::OrderExecutor;
use crate::persistence::TradeStore;

/// How an entry's protective levels are determined.
#[derive(Debug, Clone)]
enum EntryProtection {
    /// Absolute levels fixed when the risk manager approved the entry.
    Levels(StopLevels),
    /// Percent distances resolved against the actual entry price. Used
    /// for ladder fills, whose entry price is not known up front; the
    /// context outlives individual positions so every rung cycle stays
    /// protected.
    Percent {
        stop_loss_pct: Decimal,
        take_profit_pct: Decimal,
        trailing_pct: Decimal,
    },
}

/// Per-symbol entry context registered when the risk manager approves
/// an order, consumed when the entry fills.
#[derive(Debug, Clone)]
struct EntryContext {
    strategy_id: String,
    leverage: u32,
    protection: EntryProtection,
}

impl EntryContext {
    fn stop_levels(&self, side: Side, entry: Decimal) -> StopLevels {
        match &self.protection {
            EntryProtection::Levels(levels) => *levels,
            EntryProtection::Percent {
                stop_loss_pct,
                take_profit_pct,
                trailing_pct,
            } => {
                let (stop_loss, take_profit) =
                    compute_stop_levels(side, entry, *stop_loss_pct, *take_profit_pct);
                StopLevels {
                    stop_loss,
                    take_profit,
                    trailing_pct: *trailing_pct,
                }
            }
        }
    }

    fn is_persistent(&self) -> bool {
        matches!(self.protection, EntryProtection::Percent { .. })
    }
}

/// Tracks positions, applies fills in order, keeps stops attached.
pub struct PositionTracker {
    positions: HashMap<String, Position>,
    resequencers: HashMap<String, Resequencer>,
    entries: HashMap<String, EntryContext>,
    trailing: HashMap<String, TrailingStop>,
    risk: RiskManager,
    executor: Arc<OrderExecutor>,
    store: Option<Arc<dyn TradeStore>>,
    events: EventBus,
}

impl PositionTracker {
    pub fn new(risk: RiskManager, executor: Arc<OrderExecutor>, events: EventBus) -> Self {
        Self {
            positions: HashMap::new(),
            resequencers: HashMap::new(),
            entries: HashMap::new(),
            trailing: HashMap::new(),
            risk,
            executor,
            store: None,
            events,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn TradeStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn open_positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values().filter(|p| p.is_open())
    }

    /// Register an approved entry so its fill can be attributed and
    /// protected.
    pub fn register_entry(
        &mut self,
        symbol: &str,
        strategy_id: &str,
        leverage: u32,
        stops: StopLevels,
    ) {
        self.entries.insert(
            symbol.to_string(),
            EntryContext {
                strategy_id: strategy_id.to_string(),
                leverage,
                protection: EntryProtection::Levels(stops),
            },
        );
    }

    /// Register a ladder strategy's standing entry context. Rung fills
    /// resolve their protective levels against the actual entry price,
    /// and the context survives position close so the next cycle is
    /// covered too.
    pub fn register_ladder_entry(
        &mut self,
        symbol: &str,
        strategy_id: &str,
        leverage: u32,
        stop_loss_pct: Decimal,
        take_profit_pct: Decimal,
        trailing_pct: Decimal,
    ) {
        self.entries.insert(
            symbol.to_string(),
            EntryContext {
                strategy_id: strategy_id.to_string(),
                leverage,
                protection: EntryProtection::Percent {
                    stop_loss_pct,
                    take_profit_pct,
                    trailing_pct,
                },
            },
        );
    }

    /// Feed a raw fill from the stream. Fills released by the
    /// resequencer are applied in order.
    pub async fn on_fill(&mut self, fill: Fill) -> Result<(), EngineError> {
        let released = self
            .resequencers
            .entry(fill.symbol.clone())
            .or_default()
            .push(fill);

        for fill in released {
            self.apply_fill(fill).await?;
        }
        Ok(())
    }

    async fn apply_fill(&mut self, fill: Fill) -> Result<(), EngineError> {
        let symbol = fill.symbol.clone();
        let context = self.entries.get(&symbol).cloned();

        let (snapshot, was_open, prev_quantity) = {
            let position = self.positions.entry(symbol.clone()).or_insert_with(|| {
                let (strategy_id, leverage) = context
                    .as_ref()
                    .map(|c| (c.strategy_id.clone(), c.leverage))
                    .unwrap_or_else(|| (String::from("manual"), 1));
                Position::opening(&symbol, fill.side, leverage, strategy_id)
            });
            let was_open = position.is_open();
            let prev_quantity = position.quantity;
            position.apply_fill(&fill);
            (position.clone(), was_open, prev_quantity)
        };

        if snapshot.is_open() && !was_open {
            info!(
                %symbol,
                side = %snapshot.side,
                quantity = %snapshot.quantity,
                entry = %snapshot.entry_price,
                "position opened"
            );
            self.events
                .publish(EngineEvent::PositionOpened(snapshot.clone()));

            if let Some(context) = &context {
                let stops = context.stop_levels(snapshot.side, snapshot.entry_price);
                self.arm_trailing(&symbol, snapshot.side, snapshot.entry_price, &stops);
            }
        } else if snapshot.is_open() {
            self.events
                .publish(EngineEvent::PositionUpdated(snapshot.clone()));
        }

        if !snapshot.is_open() && was_open {
            info!(%symbol, realized = %snapshot.realized_pnl, "position closed");
            self.events
                .publish(EngineEvent::PositionClosed(snapshot.clone()));
            self.archive(&snapshot).await;
            self.drop_protection(&symbol).await?;
            self.positions.remove(&symbol);
            if !self.entries.get(&symbol).is_some_and(|c| c.is_persistent()) {
                self.entries.remove(&symbol);
            }
            self.trailing.remove(&symbol);
            self.executor.prune_terminal();
            return Ok(());
        }

        // A size change invalidates the resting protective orders; drop
        // them so the repair path resubmits at the current quantity.
        if was_open && snapshot.is_open() && snapshot.quantity != prev_quantity {
            self.drop_protection(&symbol).await?;
        }

        self.ensure_protected(&symbol).await
    }

    /// Cancel and clear the protective orders for `symbol`.
    async fn drop_protection(&mut self, symbol: &str) -> Result<(), EngineError> {
        let (stop, take_profit) = match self.positions.get_mut(symbol) {
            Some(position) => (
                position.protective.stop_loss_id.take(),
                position.protective.take_profit_id.take(),
            ),
            None => return Ok(()),
        };
        for id in [stop, take_profit].into_iter().flatten() {
            self.executor.cancel(symbol, &id).await?;
        }
        Ok(())
    }

    fn arm_trailing(&mut self, symbol: &str, side: Side, entry: Decimal, stops: &StopLevels) {
        if entry <= Decimal::ZERO {
            return;
        }
        // Recover the take-profit distance from the absolute level.
        let take_profit_pct = ((stops.take_profit - entry) / entry).abs();
        self.trailing.insert(
            symbol.to_string(),
            TrailingStop::new(side, entry, take_profit_pct, stops.trailing_pct),
        );
    }

    /// Stop-attachment invariant: an open position always has an active
    /// stop-loss and a take-profit. Called after every fill; also the
    /// repair path after reconciliation.
    pub async fn ensure_protected(&mut self, symbol: &str) -> Result<(), EngineError> {
        let Some(position) = self.positions.get(symbol).filter(|p| p.is_open()) else {
            return Ok(());
        };
        if position.protective.stop_loss_id.is_some() {
            return Ok(());
        }
        let Some(context) = self.entries.get(symbol) else {
            warn!(%symbol, "open position has no stop context, cannot protect");
            return Ok(());
        };

        let stops = context.stop_levels(position.side, position.entry_price);
        let (stop_req, tp_req) = self.risk.protective_requests(position, &stops);
        let stop = self.executor.submit(stop_req).await?;
        let take_profit = self.executor.submit(tp_req).await?;

        if let Some(position) = self.positions.get_mut(symbol) {
            position.protective.stop_loss_id = Some(stop.id);
            position.protective.take_profit_id = Some(take_profit.id);
        }
        Ok(())
    }

    /// Price tick: update marks and drive the trailing stop.
    pub async fn on_price(&mut self, symbol: &str, price: Decimal) -> Result<(), EngineError> {
        let Some(position) = self.positions.get_mut(symbol) else {
            return Ok(());
        };
        position.update_mark(price);

        let Some(trailing) = self.trailing.get_mut(symbol) else {
            return Ok(());
        };
        match trailing.on_price(price) {
            TrailingAction::Hold => Ok(()),
            TrailingAction::StopMoved(new_stop) => self.move_stop(symbol, new_stop).await,
            TrailingAction::Exit(stop) => {
                info!(%symbol, %stop, "trailing stop crossed, closing position");
                // The resting stop order executes the exit; nothing to
                // submit unless the stop is missing.
                self.ensure_protected(symbol).await
            }
        }
    }

    /// Replace the resting stop-loss with one at the ratcheted level.
    async fn move_stop(&mut self, symbol: &str, new_stop: Decimal) -> Result<(), EngineError> {
        let Some(position) = self.positions.get(symbol).filter(|p| p.is_open()) else {
            return Ok(());
        };

        let old_stop_id = position.protective.stop_loss_id.clone();
        let request = gridbot_core::types::OrderRequest::stop(
            symbol,
            position.side.opposite(),
            position.quantity,
            new_stop,
        );
        let order = self.executor.submit(request).await?;

        if let Some(old_id) = old_stop_id {
            self.executor.cancel(symbol, &old_id).await?;
        }
        if let Some(position) = self.positions.get_mut(symbol) {
            position.protective.stop_loss_id = Some(order.id);
            position.protective.trailing = true;
        }
        Ok(())
    }

    /// Replace local state from an exchange snapshot. The exchange is
    /// the source of truth after any stream interruption.
    ///
    /// Resting protective orders the exchange still carries are adopted
    /// into the rebuilt positions before the repair path runs, so a
    /// position that was already protected does not grow a second stop.
    pub async fn reconcile(
        &mut self,
        snapshot: Vec<Position>,
        open_orders: Vec<Order>,
    ) -> Result<(), EngineError> {
        info!(
            positions = snapshot.len(),
            orders = open_orders.len(),
            "reconciling position state"
        );

        self.positions.clear();
        for reseq in self.resequencers.values_mut() {
            reseq.reset();
        }

        let symbols: Vec<String> = snapshot.iter().map(|p| p.symbol.clone()).collect();
        for position in snapshot {
            self.positions.insert(position.symbol.clone(), position);
        }

        for order in open_orders {
            if !matches!(order.order_type, OrderType::Stop | OrderType::TakeProfit) {
                continue;
            }
            match self.positions.get_mut(&order.symbol) {
                Some(position) => {
                    let slot = match order.order_type {
                        OrderType::Stop => &mut position.protective.stop_loss_id,
                        _ => &mut position.protective.take_profit_id,
                    };
                    if slot.is_none() {
                        *slot = Some(order.id.clone());
                        self.executor.track(order);
                    } else {
                        warn!(
                            symbol = %order.symbol,
                            id = %order.id,
                            "cancelling duplicate protective order"
                        );
                        self.executor.cancel(&order.symbol, &order.id).await?;
                    }
                }
                None => {
                    warn!(
                        symbol = %order.symbol,
                        id = %order.id,
                        "cancelling stray protective order with no position"
                    );
                    self.executor.cancel(&order.symbol, &order.id).await?;
                }
            }
        }

        for symbol in symbols {
            self.ensure_protected(&symbol).await?;
        }
        Ok(())
    }

    async fn archive(&self, position: &Position) {
        if let Some(store) = &self.store {
            if let Err(e) = store.append_trade(position).await {
                warn!(error = %e, "failed to archive closed trade");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use gridbot_core::traits::Exchange;
    use gridbot_exchange::SimExchange;
    use rust_decimal_macros::dec;

    fn fill(symbol: &str, side: Side, quantity: Decimal, price: Decimal, sequence: u64) -> Fill {
        Fill {
            id: format!("f{sequence}"),
            order_id: "o1".into(),
            symbol: symbol.into(),
            side,
            quantity,
            price,
            fee: Decimal::ZERO,
            sequence,
            timestamp: Utc::now(),
        }
    }

    fn stops() -> StopLevels {
        StopLevels {
            stop_loss: dec!(29400),
            take_profit: dec!(30750),
            trailing_pct: dec!(0.01),
        }
    }

    async fn tracker_with_sim() -> (PositionTracker, Arc<SimExchange>) {
        let sim = Arc::new(SimExchange::new(dec!(100000)));
        sim.post_price("BTC_USDT", dec!(30000));
        let executor = Arc::new(OrderExecutor::new(sim.clone()));
        let tracker = PositionTracker::new(RiskManager::default(), executor, EventBus::default());
        (tracker, sim)
    }

    #[tokio::test]
    async fn test_entry_fill_attaches_protective_orders() {
        let (mut tracker, sim) = tracker_with_sim().await;
        tracker.register_entry("BTC_USDT", "rsi-btc", 1, stops());

        tracker
            .on_fill(fill("BTC_USDT", Side::Buy, dec!(0.1), dec!(30000), 1))
            .await
            .unwrap();

        let position = tracker.position("BTC_USDT").unwrap();
        assert!(position.is_open());
        assert!(position.protective.stop_loss_id.is_some());
        assert!(position.protective.take_profit_id.is_some());

        let open = sim.open_orders(Some("BTC_USDT")).await.unwrap();
        let types: Vec<OrderType> = open.iter().map(|o| o.order_type).collect();
        assert!(types.contains(&OrderType::Stop));
        assert!(types.contains(&OrderType::TakeProfit));
    }

    #[tokio::test]
    async fn test_out_of_order_fills_applied_in_sequence() {
        let (mut tracker, _sim) = tracker_with_sim().await;
        tracker.register_entry("BTC_USDT", "dca-btc", 1, stops());

        // Sequence 2 arrives first and is held.
        tracker
            .on_fill(fill("BTC_USDT", Side::Buy, dec!(1), dec!(31000), 2))
            .await
            .unwrap();
        assert!(tracker.position("BTC_USDT").is_none());

        tracker
            .on_fill(fill("BTC_USDT", Side::Buy, dec!(1), dec!(30000), 1))
            .await
            .unwrap();
        let position = tracker.position("BTC_USDT").unwrap();
        assert_eq!(position.quantity, dec!(2));
        assert_eq!(position.entry_price, dec!(30500));
    }

    #[tokio::test]
    async fn test_closing_fill_archives_and_clears() {
        let (mut tracker, _sim) = tracker_with_sim().await;
        tracker.register_entry("BTC_USDT", "rsi-btc", 1, stops());

        tracker
            .on_fill(fill("BTC_USDT", Side::Buy, dec!(0.1), dec!(30000), 1))
            .await
            .unwrap();
        tracker
            .on_fill(fill("BTC_USDT", Side::Sell, dec!(0.1), dec!(30750), 2))
            .await
            .unwrap();

        assert!(tracker.position("BTC_USDT").is_none());
    }

    #[tokio::test]
    async fn test_trailing_ratchet_replaces_stop() {
        let (mut tracker, sim) = tracker_with_sim().await;
        tracker.register_entry("BTC_USDT", "rsi-btc", 1, stops());

        tracker
            .on_fill(fill("BTC_USDT", Side::Buy, dec!(0.1), dec!(30000), 1))
            .await
            .unwrap();
        let original_stop = tracker
            .position("BTC_USDT")
            .unwrap()
            .protective
            .stop_loss_id
            .clone()
            .unwrap();

        // Price reaches the take-profit level: trailing arms and the
        // stop is replaced at the ratcheted level.
        sim.post_price("BTC_USDT", dec!(31000));
        tracker.on_price("BTC_USDT", dec!(31000)).await.unwrap();

        let position = tracker.position("BTC_USDT").unwrap();
        let new_stop = position.protective.stop_loss_id.clone().unwrap();
        assert_ne!(new_stop, original_stop);
        assert!(position.protective.trailing);
    }

    #[tokio::test]
    async fn test_reconcile_replaces_local_state() {
        let (mut tracker, _sim) = tracker_with_sim().await;
        tracker.register_entry("BTC_USDT", "rsi-btc", 1, stops());
        tracker
            .on_fill(fill("BTC_USDT", Side::Buy, dec!(0.1), dec!(30000), 1))
            .await
            .unwrap();

        // Exchange says flat: local position goes away.
        tracker.reconcile(Vec::new(), Vec::new()).await.unwrap();
        assert!(tracker.position("BTC_USDT").is_none());
    }

    #[tokio::test]
    async fn test_reconcile_adopts_resting_protective_orders() {
        let (mut tracker, sim) = tracker_with_sim().await;
        tracker.register_entry("BTC_USDT", "rsi-btc", 1, stops());
        tracker
            .on_fill(fill("BTC_USDT", Side::Buy, dec!(0.1), dec!(30000), 1))
            .await
            .unwrap();

        // The exchange reports the same position with its stop and
        // take-profit still resting.
        let exchange_position = {
            let mut position = Position::opening("BTC_USDT", Side::Buy, 1, "rsi-btc");
            position.apply_fill(&fill("BTC_USDT", Side::Buy, dec!(0.1), dec!(30000), 1));
            position
        };
        let resting = sim.open_orders(Some("BTC_USDT")).await.unwrap();

        tracker
            .reconcile(vec![exchange_position], resting)
            .await
            .unwrap();

        // The resting orders were adopted, not duplicated.
        let open = sim.open_orders(Some("BTC_USDT")).await.unwrap();
        assert_eq!(
            open.iter()
                .filter(|o| o.order_type == OrderType::Stop)
                .count(),
            1
        );
        assert_eq!(
            open.iter()
                .filter(|o| o.order_type == OrderType::TakeProfit)
                .count(),
            1
        );
        let position = tracker.position("BTC_USDT").unwrap();
        assert!(position.protective.stop_loss_id.is_some());
        assert!(position.protective.take_profit_id.is_some());
    }

    #[tokio::test]
    async fn test_reconcile_cancels_stray_protective_orders() {
        let (mut tracker, sim) = tracker_with_sim().await;
        tracker.register_entry("BTC_USDT", "rsi-btc", 1, stops());
        tracker
            .on_fill(fill("BTC_USDT", Side::Buy, dec!(0.1), dec!(30000), 1))
            .await
            .unwrap();
        let resting = sim.open_orders(Some("BTC_USDT")).await.unwrap();

        // The exchange says flat: the resting stops have no position
        // behind them any more.
        tracker.reconcile(Vec::new(), resting).await.unwrap();

        assert!(tracker.position("BTC_USDT").is_none());
        assert!(sim.open_orders(Some("BTC_USDT")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ladder_context_protects_rung_fill() {
        let (mut tracker, sim) = tracker_with_sim().await;
        tracker.register_ladder_entry(
            "BTC_USDT",
            "grid-btc",
            1,
            dec!(0.02),
            dec!(0.025),
            dec!(0.01),
        );

        tracker
            .on_fill(fill("BTC_USDT", Side::Buy, dec!(0.1), dec!(29500), 1))
            .await
            .unwrap();

        // Levels resolve against the rung's actual entry price.
        let open = sim.open_orders(Some("BTC_USDT")).await.unwrap();
        let stop = open
            .iter()
            .find(|o| o.order_type == OrderType::Stop)
            .unwrap();
        assert_eq!(stop.trigger_price, Some(dec!(28910)));

        // The context survives a close; the next cycle is covered too.
        tracker
            .on_fill(fill("BTC_USDT", Side::Sell, dec!(0.1), dec!(30000), 2))
            .await
            .unwrap();
        tracker
            .on_fill(fill("BTC_USDT", Side::Buy, dec!(0.1), dec!(29000), 3))
            .await
            .unwrap();
        let position = tracker.position("BTC_USDT").unwrap();
        assert!(position.protective.stop_loss_id.is_some());
    }

    #[tokio::test]
    async fn test_partial_close_resizes_protective_orders() {
        let (mut tracker, sim) = tracker_with_sim().await;
        tracker.register_entry("BTC_USDT", "rsi-btc", 1, stops());
        tracker
            .on_fill(fill("BTC_USDT", Side::Buy, dec!(1), dec!(30000), 1))
            .await
            .unwrap();

        // Half the position closes (a de-risk market order).
        tracker
            .on_fill(fill("BTC_USDT", Side::Sell, dec!(0.5), dec!(29800), 2))
            .await
            .unwrap();

        let open = sim.open_orders(Some("BTC_USDT")).await.unwrap();
        let resting_stops: Vec<_> = open
            .iter()
            .filter(|o| o.order_type == OrderType::Stop)
            .collect();
        assert_eq!(resting_stops.len(), 1);
        assert_eq!(resting_stops[0].quantity, dec!(0.5));
    }
}
