//! Exchange trait definition.

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::error::ExchangeError;
use crate::types::{Account, Candle, Order, OrderRequest, Position, Ticker, Timeframe};

/// Trait for exchange integrations (live REST client or the in-memory
/// simulator).
///
/// Implementations must treat `OrderRequest::client_order_id` as an
/// idempotency key: submitting a request with an id that already exists
/// returns the existing order rather than creating a second one.
#[async_trait]
pub trait Exchange: Send + Sync {
    /// Fetch recent closed candles, oldest first.
    async fn candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>, ExchangeError>;

    /// Fetch the current ticker for a symbol.
    async fn ticker(&self, symbol: &str) -> Result<Ticker, ExchangeError>;

    /// Submit a new order.
    async fn submit_order(&self, request: OrderRequest) -> Result<Order, ExchangeError>;

    /// Cancel an order by exchange id.
    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<(), ExchangeError>;

    /// Look up an order by client order id.
    async fn get_order(&self, symbol: &str, client_order_id: &str)
        -> Result<Order, ExchangeError>;

    /// Get all open orders, optionally filtered by symbol.
    async fn open_orders(&self, symbol: Option<&str>) -> Result<Vec<Order>, ExchangeError>;

    /// Get all positions currently held on the exchange.
    async fn positions(&self) -> Result<Vec<Position>, ExchangeError>;

    /// Get account balances and equity.
    async fn account(&self) -> Result<Account, ExchangeError>;

    /// Set the leverage for a symbol.
    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), ExchangeError>;

    /// Cancel all open orders, optionally filtered by symbol.
    async fn cancel_all_orders(&self, symbol: Option<&str>) -> Result<(), ExchangeError> {
        for order in self.open_orders(symbol).await? {
            self.cancel_order(&order.symbol, &order.id).await?;
        }
        Ok(())
    }

    /// Free balance shortcut.
    async fn free_balance(&self) -> Result<Decimal, ExchangeError> {
        Ok(self.account().await?.balance)
    }

    /// Get the exchange name.
    fn name(&self) -> &str;
}
