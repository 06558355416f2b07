//! Idempotent order submission with bounded retries.

use gridbot_core::error::{EngineError, ExchangeError};
use gridbot_core::traits::Exchange;
use gridbot_core::types::{Order, OrderRequest, OrderStatus};
use gridbot_exchange::ExponentialBackoff;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, warn};

const MAX_RETRIES: u32 = 3;

/// Submits orders to the exchange, keyed by client order id.
///
/// A request whose client id is already tracked returns the tracked
/// order, never a second submission. Transient failures retry with
/// backoff; after a transient failure the executor first asks the
/// exchange whether the previous attempt actually landed, because a
/// timeout does not mean the order was not placed.
pub struct OrderExecutor {
    exchange: Arc<dyn Exchange>,
    tracked: Mutex<HashMap<String, Order>>,
}

impl OrderExecutor {
    pub fn new(exchange: Arc<dyn Exchange>) -> Self {
        Self {
            exchange,
            tracked: Mutex::new(HashMap::new()),
        }
    }

    pub fn exchange(&self) -> &Arc<dyn Exchange> {
        &self.exchange
    }

    /// Submit an order, idempotently.
    ///
    /// Retry exhaustion returns `ExecutionFatal`: the outcome is
    /// unknown and the caller must reconcile against the exchange
    /// before doing anything else.
    pub async fn submit(&self, request: OrderRequest) -> Result<Order, EngineError> {
        if let Some(existing) = self.lookup(&request.client_order_id) {
            return Ok(existing);
        }

        let mut backoff =
            ExponentialBackoff::new(Duration::from_millis(500), Duration::from_secs(10), 0.1);

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                tokio::time::sleep(backoff.next_delay()).await;

                // The previous attempt may have landed despite the error.
                match self
                    .exchange
                    .get_order(&request.symbol, &request.client_order_id)
                    .await
                {
                    Ok(order) => {
                        self.track(order.clone());
                        return Ok(order);
                    }
                    Err(ExchangeError::OrderNotFound(_)) => {}
                    Err(e) if e.is_transient() => {}
                    Err(e) => return Err(e.into()),
                }
            }

            match self.exchange.submit_order(request.clone()).await {
                Ok(order) => {
                    self.track(order.clone());
                    return Ok(order);
                }
                Err(e) if e.is_transient() && attempt < MAX_RETRIES => {
                    warn!(
                        client_order_id = %request.client_order_id,
                        attempt,
                        error = %e,
                        "order submission failed, will verify and retry"
                    );
                }
                Err(ExchangeError::OrderRejected { reason }) => {
                    warn!(client_order_id = %request.client_order_id, %reason, "order rejected");
                    return Err(ExchangeError::OrderRejected { reason }.into());
                }
                Err(e) => return Err(e.into()),
            }
        }

        error!(
            client_order_id = %request.client_order_id,
            "order submission retries exhausted with unknown outcome"
        );
        Err(EngineError::ExecutionFatal(format!(
            "submission outcome unknown for {}",
            request.client_order_id
        )))
    }

    /// Cancel an order by exchange id.
    pub async fn cancel(&self, symbol: &str, order_id: &str) -> Result<(), EngineError> {
        match self.exchange.cancel_order(symbol, order_id).await {
            // Already gone is success for our purposes.
            Ok(()) | Err(ExchangeError::OrderNotFound(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Refresh a tracked order from the exchange.
    pub async fn refresh(&self, symbol: &str, client_order_id: &str) -> Result<Order, EngineError> {
        let order = self.exchange.get_order(symbol, client_order_id).await?;
        self.track(order.clone());
        Ok(order)
    }

    /// Record an order update observed elsewhere (stream, reconcile).
    pub fn track(&self, order: Order) {
        if let Ok(mut tracked) = self.tracked.lock() {
            tracked.insert(order.client_order_id.clone(), order);
        }
    }

    /// Reverse lookup: the client id of a tracked order by exchange id.
    pub fn client_id_for(&self, order_id: &str) -> Option<String> {
        self.tracked.lock().ok().and_then(|t| {
            t.values()
                .find(|o| o.id == order_id)
                .map(|o| o.client_order_id.clone())
        })
    }

    pub fn lookup(&self, client_order_id: &str) -> Option<Order> {
        self.tracked
            .lock()
            .ok()
            .and_then(|t| t.get(client_order_id).cloned())
    }

    /// Drop tracked orders that reached a terminal state.
    pub fn prune_terminal(&self) {
        if let Ok(mut tracked) = self.tracked.lock() {
            tracked.retain(|_, o| !o.status.is_terminal());
        }
    }
}

/// One-cancels-other pair of protective orders.
///
/// Tracks the two legs by client order id; when one fills the other must
/// be cancelled.
#[derive(Debug, Clone)]
pub struct Oco {
    first_id: String,
    second_id: String,
    first_status: OrderStatus,
    second_status: OrderStatus,
}

/// Follow-up action required after an OCO status update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OcoAction {
    None,
    /// Cancel the named leg
    Cancel(String),
}

impl Oco {
    pub fn new(first_id: impl Into<String>, second_id: impl Into<String>) -> Self {
        Self {
            first_id: first_id.into(),
            second_id: second_id.into(),
            first_status: OrderStatus::Submitted,
            second_status: OrderStatus::Submitted,
        }
    }

    /// Apply a status update for one leg.
    pub fn on_status(&mut self, client_order_id: &str, status: OrderStatus) -> OcoAction {
        if client_order_id == self.first_id {
            self.first_status = status;
            if status == OrderStatus::Filled && !self.second_status.is_terminal() {
                return OcoAction::Cancel(self.second_id.clone());
            }
        } else if client_order_id == self.second_id {
            self.second_status = status;
            if status == OrderStatus::Filled && !self.first_status.is_terminal() {
                return OcoAction::Cancel(self.first_id.clone());
            }
        }
        OcoAction::None
    }

    /// Both legs reached a terminal state.
    pub fn settled(&self) -> bool {
        self.first_status.is_terminal() && self.second_status.is_terminal()
    }

    /// Exactly one leg filled.
    pub fn filled_leg(&self) -> Option<&str> {
        match (self.first_status, self.second_status) {
            (OrderStatus::Filled, _) => Some(&self.first_id),
            (_, OrderStatus::Filled) => Some(&self.second_id),
            _ => None,
        }
    }
}

/// Bracket: entry plus its protective OCO pair.
#[derive(Debug, Clone)]
pub struct Bracket {
    entry_id: String,
    entry_status: OrderStatus,
    protective: Option<Oco>,
}

impl Bracket {
    pub fn new(entry_id: impl Into<String>) -> Self {
        Self {
            entry_id: entry_id.into(),
            entry_status: OrderStatus::Submitted,
            protective: None,
        }
    }

    pub fn entry_id(&self) -> &str {
        &self.entry_id
    }

    /// Attach the protective pair once the entry fills.
    pub fn protect(&mut self, stop_id: impl Into<String>, take_profit_id: impl Into<String>) {
        self.protective = Some(Oco::new(stop_id, take_profit_id));
    }

    pub fn on_status(&mut self, client_order_id: &str, status: OrderStatus) -> OcoAction {
        if client_order_id == self.entry_id {
            self.entry_status = status;
            return OcoAction::None;
        }
        match &mut self.protective {
            Some(oco) => oco.on_status(client_order_id, status),
            None => OcoAction::None,
        }
    }

    /// The bracket is settled when the entry failed outright, or when
    /// the entry filled and its protective pair has resolved.
    pub fn settled(&self) -> bool {
        match self.entry_status {
            OrderStatus::Cancelled | OrderStatus::Rejected => true,
            OrderStatus::Filled => self.protective.as_ref().map_or(false, |o| o.settled()),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridbot_core::types::Side;
    use gridbot_exchange::SimExchange;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_submit_is_idempotent() {
        let sim = Arc::new(SimExchange::new(dec!(10000)));
        sim.post_price("BTC_USDT", dec!(30000));
        let executor = OrderExecutor::new(sim);

        let request = OrderRequest::market("BTC_USDT", Side::Buy, dec!(0.1))
            .with_client_order_id("rsi-btc_entry");
        let first = executor.submit(request.clone()).await.unwrap();
        let second = executor.submit(request).await.unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_rejection_not_tracked() {
        let sim = Arc::new(SimExchange::new(dec!(10000)));
        sim.post_price("BTC_USDT", dec!(30000));
        let executor = OrderExecutor::new(sim);

        let order = executor
            .submit(OrderRequest::market("BTC_USDT", Side::Buy, dec!(0.1)))
            .await
            .unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        assert!(executor.lookup(&order.client_order_id).is_some());

        executor.prune_terminal();
        assert!(executor.lookup(&order.client_order_id).is_none());
    }

    #[test]
    fn test_oco_fill_cancels_other() {
        let mut oco = Oco::new("stp_1", "tp_1");

        let action = oco.on_status("tp_1", OrderStatus::Filled);
        assert_eq!(action, OcoAction::Cancel("stp_1".into()));
        assert!(!oco.settled());

        assert_eq!(oco.on_status("stp_1", OrderStatus::Cancelled), OcoAction::None);
        assert!(oco.settled());
        assert_eq!(oco.filled_leg(), Some("tp_1"));
    }

    #[test]
    fn test_oco_exactly_one_fills() {
        let mut oco = Oco::new("stp_1", "tp_1");
        oco.on_status("stp_1", OrderStatus::Filled);

        // The other leg resolves by cancellation, not a second fill.
        oco.on_status("tp_1", OrderStatus::Cancelled);
        assert!(oco.settled());
        assert_eq!(oco.filled_leg(), Some("stp_1"));
    }

    #[test]
    fn test_bracket_lifecycle() {
        let mut bracket = Bracket::new("entry_1");
        assert!(!bracket.settled());

        bracket.on_status("entry_1", OrderStatus::Filled);
        bracket.protect("stp_1", "tp_1");
        assert!(!bracket.settled());

        let action = bracket.on_status("stp_1", OrderStatus::Filled);
        assert_eq!(action, OcoAction::Cancel("tp_1".into()));
        bracket.on_status("tp_1", OrderStatus::Cancelled);
        assert!(bracket.settled());
    }

    #[test]
    fn test_cancelled_entry_settles_bracket() {
        let mut bracket = Bracket::new("entry_1");
        bracket.on_status("entry_1", OrderStatus::Cancelled);
        assert!(bracket.settled());
    }
}
