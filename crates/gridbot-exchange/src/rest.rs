//! Live exchange REST client.
//!
//! Signed requests carry the API key and an HMAC signature over
//! `METHOD` + `path?sorted-query` + JSON body. Transient failures are
//! retried with exponential backoff; rejections and auth failures are
//! surfaced immediately.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use gridbot_core::error::ExchangeError;
use gridbot_core::types::{
    Account, Candle, Order, OrderRequest, OrderStatus, OrderType, Position, PositionStatus,
    RejectReason, Side, Ticker, Timeframe,
};
use reqwest::{Client, Method, StatusCode};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

use crate::backoff::ExponentialBackoff;
use crate::signer::{ApiCredentials, RequestSigner};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_RETRIES: u32 = 3;
const KEY_HEADER: &str = "GRID-KEY";
const SIGNATURE_HEADER: &str = "GRID-SIGNATURE";

/// REST client for the live exchange.
pub struct RestExchange {
    client: Client,
    base_url: String,
    credentials: ApiCredentials,
}

impl RestExchange {
    pub fn new(base_url: &str, credentials: ApiCredentials) -> Result<Self, ExchangeError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ExchangeError::Connection(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    /// Send a request, retrying transient failures with backoff.
    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, &str)],
        body: Option<serde_json::Value>,
        signed: bool,
    ) -> Result<T, ExchangeError> {
        let mut backoff = ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(30), 0.1);
        let mut last_err = None;

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let delay = match &last_err {
                    Some(ExchangeError::RateLimited {
                        retry_after_secs: Some(secs),
                    }) => Duration::from_secs(*secs),
                    _ => backoff.next_delay(),
                };
                warn!(path, attempt, ?delay, "retrying exchange request");
                tokio::time::sleep(delay).await;
            }

            match self
                .send_once(method.clone(), path, params, body.as_ref(), signed)
                .await
            {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < MAX_RETRIES => {
                    last_err = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        Err(last_err.unwrap_or_else(|| ExchangeError::Connection("retries exhausted".into())))
    }

    async fn send_once<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, &str)],
        body: Option<&serde_json::Value>,
        signed: bool,
    ) -> Result<T, ExchangeError> {
        let body_text = match body {
            Some(value) => value.to_string(),
            None => String::new(),
        };

        let mut request = if signed {
            let signer = RequestSigner::new(&self.credentials);
            let timestamp = Utc::now().timestamp_millis();
            let signed_req =
                signer.sign_request(method.as_str(), path, params, timestamp, &body_text);
            let url = format!("{}{}?{}", self.base_url, path, signed_req.query);
            self.client
                .request(method, &url)
                .header(KEY_HEADER, self.credentials.api_key())
                .header(SIGNATURE_HEADER, &signed_req.signature)
        } else {
            let url = format!("{}{}", self.base_url, path);
            self.client.request(method, &url).query(params)
        };

        if !body_text.is_empty() {
            request = request
                .header("Content-Type", "application/json")
                .body(body_text);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ExchangeError::Timeout(e.to_string())
            } else {
                ExchangeError::Connection(e.to_string())
            }
        })?;

        let status = response.status();
        match status {
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after_secs = response
                    .headers()
                    .get("Retry-After")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse().ok());
                return Err(ExchangeError::RateLimited { retry_after_secs });
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                let body = response.text().await.unwrap_or_default();
                return Err(ExchangeError::Auth(body));
            }
            s if s.is_server_error() => {
                let body = response.text().await.unwrap_or_default();
                return Err(ExchangeError::Server {
                    status: s.as_u16(),
                    body,
                });
            }
            _ => {}
        }

        let text = response
            .text()
            .await
            .map_err(|e| ExchangeError::Connection(e.to_string()))?;
        let envelope: ApiEnvelope<T> = serde_json::from_str(&text)
            .map_err(|e| ExchangeError::Malformed(format!("{e}: {text}")))?;

        if let Some(code) = envelope.code.filter(|c| *c != 0) {
            let message = envelope.message.unwrap_or_default();
            debug!(code, %message, path, "exchange returned error code");
            return Err(reject_from_api_error(code, &message));
        }

        envelope
            .data
            .ok_or_else(|| ExchangeError::Malformed("response has no data field".into()))
    }
}

/// Map an application-level error code to a structured error.
fn reject_from_api_error(code: i64, message: &str) -> ExchangeError {
    let lower = message.to_ascii_lowercase();
    let reason = if lower.contains("balance") || lower.contains("insufficient") {
        RejectReason::InsufficientBalance
    } else if lower.contains("size") || lower.contains("quantity") {
        RejectReason::InvalidSize
    } else if lower.contains("price") {
        RejectReason::PriceOutsideLimits
    } else if lower.contains("symbol") {
        return ExchangeError::UnknownSymbol(message.to_string());
    } else if lower.contains("duplicate") || lower.contains("client order") {
        RejectReason::DuplicateClientOrderId
    } else {
        RejectReason::Other(format!("code {code}: {message}"))
    };
    ExchangeError::OrderRejected { reason }
}

// Wire types. All prices and quantities arrive as strings.

#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default, alias = "msg")]
    message: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct KlinesData {
    klines: Vec<KlineWire>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KlineWire {
    time: i64,
    open: String,
    high: String,
    low: String,
    close: String,
    volume: String,
}

#[derive(Debug, Deserialize)]
struct TickersData {
    tickers: Vec<TickerWire>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TickerWire {
    symbol: String,
    close: Decimal,
    #[serde(default)]
    bid: Option<Decimal>,
    #[serde(default)]
    ask: Option<Decimal>,
    time: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderWire {
    order_id: String,
    #[serde(default)]
    client_order_id: String,
    symbol: String,
    side: String,
    #[serde(rename = "type")]
    order_type: String,
    size: Decimal,
    #[serde(default)]
    price: Option<Decimal>,
    #[serde(default)]
    trigger_price: Option<Decimal>,
    #[serde(default)]
    filled_size: Option<Decimal>,
    #[serde(default)]
    filled_avg_price: Option<Decimal>,
    status: String,
    create_time: i64,
    update_time: i64,
}

#[derive(Debug, Deserialize)]
struct OrdersData {
    orders: Vec<OrderWire>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PositionWire {
    symbol: String,
    side: String,
    size: Decimal,
    entry_price: Decimal,
    mark_price: Decimal,
    leverage: u32,
    #[serde(default)]
    unrealized_pnl: Decimal,
}

#[derive(Debug, Deserialize)]
struct PositionsData {
    positions: Vec<PositionWire>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BalanceWire {
    coin: String,
    free: Decimal,
    #[serde(default)]
    frozen: Decimal,
}

#[derive(Debug, Deserialize)]
struct BalancesData {
    balances: Vec<BalanceWire>,
}

#[derive(Debug, Deserialize)]
struct EmptyData {}

fn parse_price(value: &str) -> Result<f64, ExchangeError> {
    value
        .parse()
        .map_err(|_| ExchangeError::Malformed(format!("bad numeric field: {value}")))
}

fn candle_from_wire(wire: &KlineWire) -> Result<Candle, ExchangeError> {
    Ok(Candle::new(
        wire.time,
        parse_price(&wire.open)?,
        parse_price(&wire.high)?,
        parse_price(&wire.low)?,
        parse_price(&wire.close)?,
        parse_price(&wire.volume)?,
    ))
}

fn side_from_wire(side: &str) -> Result<Side, ExchangeError> {
    match side {
        "BUY" => Ok(Side::Buy),
        "SELL" => Ok(Side::Sell),
        other => Err(ExchangeError::Malformed(format!("unknown side: {other}"))),
    }
}

fn status_from_wire(status: &str) -> OrderStatus {
    match status {
        "OPEN" | "NEW" => OrderStatus::Submitted,
        "PARTIALLY_FILLED" => OrderStatus::PartiallyFilled,
        "FILLED" | "CLOSED" => OrderStatus::Filled,
        "CANCELED" | "CANCELLED" => OrderStatus::Cancelled,
        "REJECTED" => OrderStatus::Rejected,
        _ => OrderStatus::Pending,
    }
}

fn order_type_from_wire(order_type: &str) -> OrderType {
    match order_type {
        "LIMIT" => OrderType::Limit,
        "STOP" | "STOP_MARKET" => OrderType::Stop,
        "TAKE_PROFIT" | "TAKE_PROFIT_MARKET" => OrderType::TakeProfit,
        _ => OrderType::Market,
    }
}

fn order_from_wire(wire: OrderWire) -> Result<Order, ExchangeError> {
    let filled_quantity = wire.filled_size.unwrap_or(Decimal::ZERO);
    Ok(Order {
        id: wire.order_id,
        client_order_id: wire.client_order_id,
        symbol: wire.symbol,
        side: side_from_wire(&wire.side)?,
        order_type: order_type_from_wire(&wire.order_type),
        quantity: wire.size,
        limit_price: wire.price,
        trigger_price: wire.trigger_price,
        leverage: 1,
        reduce_only: false,
        status: status_from_wire(&wire.status),
        filled_quantity,
        filled_avg_price: wire.filled_avg_price,
        reject_reason: None,
        created_at: Utc
            .timestamp_millis_opt(wire.create_time)
            .single()
            .unwrap_or_else(Utc::now),
        updated_at: Utc
            .timestamp_millis_opt(wire.update_time)
            .single()
            .unwrap_or_else(Utc::now),
    })
}

fn position_from_wire(wire: PositionWire) -> Result<Position, ExchangeError> {
    let side = side_from_wire(&wire.side)?;
    let mut position = Position::opening(wire.symbol, side, wire.leverage.max(1), "");
    position.quantity = wire.size;
    position.entry_price = wire.entry_price;
    position.status = PositionStatus::Open;
    position.mark_price = wire.mark_price;
    position.unrealized_pnl = wire.unrealized_pnl;
    Ok(position)
}

fn order_request_body(request: &OrderRequest) -> serde_json::Value {
    let mut body = json!({
        "symbol": request.symbol,
        "side": request.side.to_string(),
        "type": request.order_type.to_string(),
        "size": request.quantity.to_string(),
        "clientOrderId": request.client_order_id,
        "reduceOnly": request.reduce_only,
    });
    if let Some(price) = request.limit_price {
        body["price"] = json!(price.to_string());
    }
    if let Some(trigger) = request.trigger_price {
        body["triggerPrice"] = json!(trigger.to_string());
    }
    body
}

#[async_trait]
impl gridbot_core::traits::Exchange for RestExchange {
    async fn candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let interval = timeframe.to_string().to_ascii_uppercase();
        let limit = limit.min(500).to_string();
        let params = [
            ("symbol", symbol),
            ("interval", interval.as_str()),
            ("limit", limit.as_str()),
        ];

        let data: KlinesData = self
            .request(Method::GET, "/api/v1/market/klines", &params, None, false)
            .await?;

        let mut candles = data
            .klines
            .iter()
            .map(candle_from_wire)
            .collect::<Result<Vec<_>, _>>()?;
        candles.sort_by_key(|c| c.open_time);
        Ok(candles)
    }

    async fn ticker(&self, symbol: &str) -> Result<Ticker, ExchangeError> {
        let params = [("symbol", symbol)];
        let data: TickersData = self
            .request(Method::GET, "/api/v1/market/tickers", &params, None, false)
            .await?;

        let wire = data
            .tickers
            .into_iter()
            .find(|t| t.symbol == symbol)
            .ok_or_else(|| ExchangeError::UnknownSymbol(symbol.to_string()))?;

        let last = wire.close.to_f64().unwrap_or(0.0);
        Ok(Ticker {
            symbol: wire.symbol,
            last,
            bid: wire.bid.and_then(|b| b.to_f64()).unwrap_or(last),
            ask: wire.ask.and_then(|a| a.to_f64()).unwrap_or(last),
            timestamp: wire.time,
        })
    }

    async fn submit_order(&self, request: OrderRequest) -> Result<Order, ExchangeError> {
        let body = order_request_body(&request);
        let wire: OrderWire = self
            .request(Method::POST, "/api/v1/trade/order", &[], Some(body), true)
            .await?;
        let mut order = order_from_wire(wire)?;
        order.leverage = request.leverage;
        order.reduce_only = request.reduce_only;
        Ok(order)
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<(), ExchangeError> {
        let body = json!({ "symbol": symbol, "orderId": order_id });
        let _: EmptyData = self
            .request(Method::DELETE, "/api/v1/trade/order", &[], Some(body), true)
            .await?;
        Ok(())
    }

    async fn get_order(
        &self,
        symbol: &str,
        client_order_id: &str,
    ) -> Result<Order, ExchangeError> {
        let params = [("symbol", symbol), ("clientOrderId", client_order_id)];
        let wire: OrderWire = self
            .request(Method::GET, "/api/v1/trade/order", &params, None, true)
            .await?;
        order_from_wire(wire)
    }

    async fn open_orders(&self, symbol: Option<&str>) -> Result<Vec<Order>, ExchangeError> {
        let params: Vec<(&str, &str)> = match symbol {
            Some(s) => vec![("symbol", s)],
            None => Vec::new(),
        };
        let data: OrdersData = self
            .request(Method::GET, "/api/v1/trade/openOrders", &params, None, true)
            .await?;
        data.orders.into_iter().map(order_from_wire).collect()
    }

    async fn positions(&self) -> Result<Vec<Position>, ExchangeError> {
        let data: PositionsData = self
            .request(Method::GET, "/api/v1/account/positions", &[], None, true)
            .await?;
        data.positions.into_iter().map(position_from_wire).collect()
    }

    async fn account(&self) -> Result<Account, ExchangeError> {
        let balances: BalancesData = self
            .request(Method::GET, "/api/v1/account/balances", &[], None, true)
            .await?;
        let quote = balances
            .balances
            .iter()
            .find(|b| b.coin == "USDT")
            .map(|b| b.free)
            .unwrap_or(Decimal::ZERO);

        let mut account = Account::new(quote);
        for position in self.positions().await? {
            account.positions.insert(position.symbol.clone(), position);
        }
        account.update_equity();
        Ok(account)
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), ExchangeError> {
        let body = json!({ "symbol": symbol, "leverage": leverage });
        let _: EmptyData = self
            .request(
                Method::POST,
                "/api/v1/account/leverage",
                &[],
                Some(body),
                true,
            )
            .await?;
        Ok(())
    }

    fn name(&self) -> &str {
        "rest"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reject_parsing() {
        match reject_from_api_error(1001, "Insufficient balance for order") {
            ExchangeError::OrderRejected { reason } => {
                assert_eq!(reason, RejectReason::InsufficientBalance)
            }
            other => panic!("unexpected: {other:?}"),
        }

        assert!(matches!(
            reject_from_api_error(2002, "unknown symbol FOO_BAR"),
            ExchangeError::UnknownSymbol(_)
        ));

        match reject_from_api_error(3003, "duplicate clientOrderId") {
            ExchangeError::OrderRejected { reason } => {
                assert_eq!(reason, RejectReason::DuplicateClientOrderId)
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_kline_wire_parsing() {
        let json = r#"{
            "code": 0,
            "data": {"klines": [
                {"time": 1700000000000, "open": "30000", "high": "30100",
                 "low": "29900", "close": "30050", "volume": "12.5"}
            ]}
        }"#;
        let envelope: ApiEnvelope<KlinesData> = serde_json::from_str(json).unwrap();
        let data = envelope.data.unwrap();
        let candle = candle_from_wire(&data.klines[0]).unwrap();
        assert_eq!(candle.open_time, 1700000000000);
        assert_eq!(candle.close, 30050.0);
        assert!(candle.closed);
    }

    #[test]
    fn test_order_wire_parsing() {
        let json = r#"{
            "orderId": "123", "clientOrderId": "rsi-btc_abc", "symbol": "BTC_USDT",
            "side": "BUY", "type": "LIMIT", "size": "0.5", "price": "30000",
            "filledSize": "0.2", "filledAvgPrice": "29990", "status": "PARTIALLY_FILLED",
            "createTime": 1700000000000, "updateTime": 1700000001000
        }"#;
        let wire: OrderWire = serde_json::from_str(json).unwrap();
        let order = order_from_wire(wire).unwrap();
        assert_eq!(order.status, OrderStatus::PartiallyFilled);
        assert_eq!(order.order_type, OrderType::Limit);
        assert_eq!(order.remaining_quantity().to_string(), "0.3");
    }

    #[test]
    fn test_request_body_shape() {
        let request = OrderRequest::limit("BTC_USDT", Side::Buy, Decimal::ONE, Decimal::from(30000));
        let body = order_request_body(&request);
        assert_eq!(body["symbol"], "BTC_USDT");
        assert_eq!(body["side"], "BUY");
        assert_eq!(body["type"], "LIMIT");
        assert_eq!(body["price"], "30000");
    }
}
