//! In-memory exchange simulator for paper trading and tests.

use async_trait::async_trait;
use chrono::Utc;
use gridbot_core::error::ExchangeError;
use gridbot_core::traits::Exchange;
use gridbot_core::types::{
    Account, Candle, Fill, Order, OrderRequest, OrderStatus, OrderType, Position, Side, Ticker,
    Timeframe,
};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use uuid::Uuid;

struct SimState {
    prices: HashMap<String, Decimal>,
    candles: HashMap<(String, Timeframe), Vec<Candle>>,
    orders: HashMap<String, Order>,
    client_index: HashMap<String, String>,
    account: Account,
    leverage: HashMap<String, u32>,
    sequence: u64,
}

/// Simulated exchange.
///
/// Prices are posted by the caller; resting orders cross against each
/// posted price. Client order ids are idempotency keys, exactly like the
/// live exchange: resubmitting an id returns the existing order.
pub struct SimExchange {
    state: Arc<Mutex<SimState>>,
    fill_tx: Mutex<Option<mpsc::UnboundedSender<Fill>>>,
}

impl SimExchange {
    pub fn new(initial_balance: Decimal) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                prices: HashMap::new(),
                candles: HashMap::new(),
                orders: HashMap::new(),
                client_index: HashMap::new(),
                account: Account::new(initial_balance),
                leverage: HashMap::new(),
                sequence: 0,
            })),
            fill_tx: Mutex::new(None),
        }
    }

    /// Subscribe to the simulated fill stream.
    pub fn fill_events(&self) -> mpsc::UnboundedReceiver<Fill> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.fill_tx.lock().unwrap() = Some(tx);
        rx
    }

    /// Seed candle history served by `candles()`.
    pub fn seed_candles(&self, symbol: &str, timeframe: Timeframe, candles: Vec<Candle>) {
        let mut state = self.state.lock().unwrap();
        state
            .candles
            .insert((symbol.to_string(), timeframe), candles);
    }

    /// Post a price: updates marks and crosses resting orders.
    pub fn post_price(&self, symbol: &str, price: Decimal) {
        let fills = {
            let mut state = self.state.lock().unwrap();
            state.prices.insert(symbol.to_string(), price);
            if let Some(position) = state.account.positions.get_mut(symbol) {
                position.update_mark(price);
            }
            state.account.update_equity();
            Self::cross_orders(&mut state, symbol, price)
        };
        self.emit(fills);
    }

    fn emit(&self, fills: Vec<Fill>) {
        if fills.is_empty() {
            return;
        }
        if let Some(tx) = self.fill_tx.lock().unwrap().as_ref() {
            for fill in fills {
                let _ = tx.send(fill);
            }
        }
    }

    /// Try to cross every active order in `symbol` against `price`.
    fn cross_orders(state: &mut SimState, symbol: &str, price: Decimal) -> Vec<Fill> {
        let crossable: Vec<String> = state
            .orders
            .values()
            .filter(|o| o.symbol == symbol && o.status.is_active())
            .filter(|o| Self::crosses(o, price))
            .map(|o| o.id.clone())
            .collect();

        let mut fills = Vec::new();
        for order_id in crossable {
            if let Some(fill) = Self::execute(state, &order_id) {
                fills.push(fill);
            }
        }
        fills
    }

    fn crosses(order: &Order, price: Decimal) -> bool {
        match order.order_type {
            OrderType::Market => true,
            OrderType::Limit => match (order.side, order.limit_price) {
                (Side::Buy, Some(limit)) => price <= limit,
                (Side::Sell, Some(limit)) => price >= limit,
                _ => false,
            },
            // A stop fires when price moves against the position.
            OrderType::Stop => match (order.side, order.trigger_price) {
                (Side::Sell, Some(trigger)) => price <= trigger,
                (Side::Buy, Some(trigger)) => price >= trigger,
                _ => false,
            },
            // A take-profit fires when price moves in favor.
            OrderType::TakeProfit => match (order.side, order.trigger_price) {
                (Side::Sell, Some(trigger)) => price >= trigger,
                (Side::Buy, Some(trigger)) => price <= trigger,
                _ => false,
            },
        }
    }

    fn fill_price(order: &Order, market: Decimal) -> Decimal {
        match order.order_type {
            OrderType::Market => market,
            OrderType::Limit => order.limit_price.unwrap_or(market),
            OrderType::Stop | OrderType::TakeProfit => order.trigger_price.unwrap_or(market),
        }
    }

    /// Fill an order completely and update account state.
    fn execute(state: &mut SimState, order_id: &str) -> Option<Fill> {
        let market = {
            let order = state.orders.get(order_id)?;
            *state.prices.get(&order.symbol)?
        };

        state.sequence += 1;
        let sequence = state.sequence;

        let order = state.orders.get_mut(order_id)?;
        let price = Self::fill_price(order, market);
        let fill = Fill {
            id: Uuid::new_v4().simple().to_string(),
            order_id: order.id.clone(),
            symbol: order.symbol.clone(),
            side: order.side,
            quantity: order.remaining_quantity(),
            price,
            fee: Decimal::ZERO,
            sequence,
            timestamp: Utc::now(),
        };
        order.apply_fill(&fill);
        let leverage = order.leverage;
        let reduce_only = order.reduce_only;
        let symbol = order.symbol.clone();
        let side = order.side;

        // Account bookkeeping under isolated margin: entries lock margin,
        // exits return it plus realized PnL.
        let position = state
            .account
            .positions
            .entry(symbol.clone())
            .or_insert_with(|| {
                Position::opening(&symbol, if reduce_only { side.opposite() } else { side }, leverage, "sim")
            });

        let margin_before = position.margin();
        let realized = position.apply_fill(&fill);
        let margin_after = position.margin();

        state.account.balance += margin_before - margin_after + realized - fill.fee;
        state.account.update_equity();

        Some(fill)
    }
}

#[async_trait]
impl Exchange for SimExchange {
    async fn candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let state = self.state.lock().unwrap();
        let series = state
            .candles
            .get(&(symbol.to_string(), timeframe))
            .cloned()
            .unwrap_or_default();
        let start = series.len().saturating_sub(limit);
        Ok(series[start..].to_vec())
    }

    async fn ticker(&self, symbol: &str) -> Result<Ticker, ExchangeError> {
        let state = self.state.lock().unwrap();
        let price = state
            .prices
            .get(symbol)
            .copied()
            .ok_or_else(|| ExchangeError::UnknownSymbol(symbol.to_string()))?;
        let last = price.to_f64().unwrap_or(0.0);
        Ok(Ticker {
            symbol: symbol.to_string(),
            last,
            bid: last,
            ask: last,
            timestamp: Utc::now().timestamp_millis(),
        })
    }

    async fn submit_order(&self, request: OrderRequest) -> Result<Order, ExchangeError> {
        let (order, fills) = {
            let mut state = self.state.lock().unwrap();

            // Idempotency: a known client id returns the tracked order.
            if let Some(existing_id) = state.client_index.get(&request.client_order_id) {
                let existing = state
                    .orders
                    .get(existing_id)
                    .cloned()
                    .ok_or_else(|| ExchangeError::OrderNotFound(existing_id.clone()))?;
                return Ok(existing);
            }

            let mut order = Order::from_request(&request);
            order.id = Uuid::new_v4().simple().to_string();
            order.status = OrderStatus::Submitted;

            state
                .client_index
                .insert(request.client_order_id.clone(), order.id.clone());
            state.orders.insert(order.id.clone(), order.clone());

            let fills = match state.prices.get(&request.symbol).copied() {
                Some(price) if Self::crosses(&order, price) => {
                    let fill = Self::execute(&mut state, &order.id);
                    order = state
                        .orders
                        .get(&order.id)
                        .cloned()
                        .unwrap_or(order);
                    fill.into_iter().collect()
                }
                _ => Vec::new(),
            };
            (order, fills)
        };
        self.emit(fills);
        Ok(order)
    }

    async fn cancel_order(&self, _symbol: &str, order_id: &str) -> Result<(), ExchangeError> {
        let mut state = self.state.lock().unwrap();
        let order = state
            .orders
            .get_mut(order_id)
            .ok_or_else(|| ExchangeError::OrderNotFound(order_id.to_string()))?;
        if order.status.is_terminal() {
            return Err(ExchangeError::OrderNotFound(order_id.to_string()));
        }
        order.status = OrderStatus::Cancelled;
        order.updated_at = Utc::now();
        Ok(())
    }

    async fn get_order(
        &self,
        _symbol: &str,
        client_order_id: &str,
    ) -> Result<Order, ExchangeError> {
        let state = self.state.lock().unwrap();
        let order_id = state
            .client_index
            .get(client_order_id)
            .ok_or_else(|| ExchangeError::OrderNotFound(client_order_id.to_string()))?;
        state
            .orders
            .get(order_id)
            .cloned()
            .ok_or_else(|| ExchangeError::OrderNotFound(client_order_id.to_string()))
    }

    async fn open_orders(&self, symbol: Option<&str>) -> Result<Vec<Order>, ExchangeError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .orders
            .values()
            .filter(|o| o.status.is_active())
            .filter(|o| symbol.map_or(true, |s| o.symbol == s))
            .cloned()
            .collect())
    }

    async fn positions(&self) -> Result<Vec<Position>, ExchangeError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .account
            .positions
            .values()
            .filter(|p| p.is_open())
            .cloned()
            .collect())
    }

    async fn account(&self) -> Result<Account, ExchangeError> {
        Ok(self.state.lock().unwrap().account.clone())
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), ExchangeError> {
        let mut state = self.state.lock().unwrap();
        state.leverage.insert(symbol.to_string(), leverage);
        Ok(())
    }

    fn name(&self) -> &str {
        "sim"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_market_order_fills_at_posted_price() {
        let sim = SimExchange::new(dec!(10000));
        sim.post_price("BTC_USDT", dec!(30000));

        let order = sim
            .submit_order(OrderRequest::market("BTC_USDT", Side::Buy, dec!(0.1)))
            .await
            .unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.filled_avg_price, Some(dec!(30000)));

        let account = sim.account().await.unwrap();
        assert!(account.has_position("BTC_USDT"));
        // Margin (1x) locked out of balance.
        assert_eq!(account.balance, dec!(7000));
    }

    #[tokio::test]
    async fn test_duplicate_client_order_id_is_idempotent() {
        let sim = SimExchange::new(dec!(10000));
        sim.post_price("BTC_USDT", dec!(30000));

        let request = OrderRequest::market("BTC_USDT", Side::Buy, dec!(0.1))
            .with_client_order_id("rsi-btc_fixed");
        let first = sim.submit_order(request.clone()).await.unwrap();
        let second = sim.submit_order(request).await.unwrap();

        assert_eq!(first.id, second.id);
        let account = sim.account().await.unwrap();
        // Only one fill was applied.
        assert_eq!(account.position("BTC_USDT").unwrap().quantity, dec!(0.1));
    }

    #[tokio::test]
    async fn test_limit_order_rests_until_crossed() {
        let sim = SimExchange::new(dec!(10000));
        sim.post_price("BTC_USDT", dec!(30000));

        let order = sim
            .submit_order(OrderRequest::limit(
                "BTC_USDT",
                Side::Buy,
                dec!(0.1),
                dec!(29500),
            ))
            .await
            .unwrap();
        assert_eq!(order.status, OrderStatus::Submitted);

        sim.post_price("BTC_USDT", dec!(29400));
        let resting = sim.get_order("BTC_USDT", &order.client_order_id).await.unwrap();
        assert_eq!(resting.status, OrderStatus::Filled);
        assert_eq!(resting.filled_avg_price, Some(dec!(29500)));
    }

    #[tokio::test]
    async fn test_stop_closes_position() {
        let sim = SimExchange::new(dec!(10000));
        sim.post_price("BTC_USDT", dec!(30000));

        sim.submit_order(OrderRequest::market("BTC_USDT", Side::Buy, dec!(0.1)))
            .await
            .unwrap();
        sim.submit_order(OrderRequest::stop(
            "BTC_USDT",
            Side::Sell,
            dec!(0.1),
            dec!(29400),
        ))
        .await
        .unwrap();

        sim.post_price("BTC_USDT", dec!(29300));
        let account = sim.account().await.unwrap();
        assert!(!account.has_position("BTC_USDT"));
    }

    #[tokio::test]
    async fn test_fill_sequences_increment() {
        let sim = SimExchange::new(dec!(10000));
        let mut fills = sim.fill_events();
        sim.post_price("BTC_USDT", dec!(30000));

        sim.submit_order(OrderRequest::market("BTC_USDT", Side::Buy, dec!(0.1)))
            .await
            .unwrap();
        sim.submit_order(OrderRequest::market("BTC_USDT", Side::Buy, dec!(0.1)))
            .await
            .unwrap();

        let first = fills.recv().await.unwrap();
        let second = fills.recv().await.unwrap();
        assert_eq!(second.sequence, first.sequence + 1);
    }

    #[tokio::test]
    async fn test_cancel_resting_order() {
        let sim = SimExchange::new(dec!(10000));
        sim.post_price("BTC_USDT", dec!(30000));

        let order = sim
            .submit_order(OrderRequest::limit(
                "BTC_USDT",
                Side::Buy,
                dec!(0.1),
                dec!(29000),
            ))
            .await
            .unwrap();
        sim.cancel_order("BTC_USDT", &order.id).await.unwrap();

        assert!(sim.open_orders(Some("BTC_USDT")).await.unwrap().is_empty());
    }
}
