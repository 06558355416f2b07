//! Streaming market data feed.
//!
//! The connection lifecycle is an explicit state machine. After any drop
//! the feed must pass through Reconciling before it streams again: a
//! `Reconcile` event tells the engine to refetch candle history and
//! reconcile orders and positions, because anything may have happened
//! while the socket was down.

use chrono::{TimeZone, Utc};
use futures::{SinkExt, StreamExt};
use gridbot_core::error::ExchangeError;
use gridbot_core::types::{Candle, Fill, Side, Ticker, Timeframe};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{info, warn};

use crate::backoff::ExponentialBackoff;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// Connection must survive this long before the backoff schedule resets.
const STABLE_CONNECTION: Duration = Duration::from_secs(300);

/// Feed connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedState {
    Connecting,
    Streaming,
    Backoff,
    Reconciling,
}

/// One stream subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscription {
    pub symbol: String,
    pub timeframe: Timeframe,
}

/// Events delivered to the engine.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    /// A candle update; `candle.closed` distinguishes closed candles
    /// from in-progress updates
    Candle {
        symbol: String,
        timeframe: Timeframe,
        candle: Candle,
    },
    /// Ticker update
    Ticker(Ticker),
    /// A fill from the user-data stream
    Fill(Fill),
    /// The connection dropped and has been re-established. The engine
    /// must refetch history and reconcile state before trusting the
    /// stream again.
    Reconcile,
}

/// WebSocket market data feed with automatic reconnection.
pub struct MarketDataFeed {
    ws_url: String,
    subscriptions: Vec<Subscription>,
    events: mpsc::Sender<FeedEvent>,
    shutdown: watch::Receiver<bool>,
    state: FeedState,
    has_streamed: bool,
}

impl MarketDataFeed {
    pub fn new(
        ws_url: impl Into<String>,
        subscriptions: Vec<Subscription>,
        events: mpsc::Sender<FeedEvent>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            ws_url: ws_url.into(),
            subscriptions,
            events,
            shutdown,
            state: FeedState::Connecting,
            has_streamed: false,
        }
    }

    pub fn state(&self) -> FeedState {
        self.state
    }

    /// Run until shutdown is signalled.
    pub async fn run(&mut self) -> Result<(), ExchangeError> {
        let mut backoff =
            ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(60), 0.1);

        loop {
            if *self.shutdown.borrow() {
                return Ok(());
            }

            self.state = FeedState::Connecting;
            let session = self.run_session().await;

            match session {
                SessionEnd::Shutdown => return Ok(()),
                SessionEnd::Dropped { lived } => {
                    if lived >= STABLE_CONNECTION {
                        backoff.reset();
                    }
                    self.state = FeedState::Backoff;
                    let delay = backoff.next_delay();
                    warn!(?delay, "feed disconnected, backing off");
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.shutdown.changed() => {
                            if *self.shutdown.borrow() {
                                return Ok(());
                            }
                        }
                    }
                }
            }
        }
    }

    async fn run_session(&mut self) -> SessionEnd {
        let connect = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(&self.ws_url));
        let stream = tokio::select! {
            result = connect => match result {
                Ok(Ok((stream, _))) => stream,
                Ok(Err(e)) => {
                    warn!(error = %e, "feed connect failed");
                    return SessionEnd::Dropped { lived: Duration::ZERO };
                }
                Err(_) => {
                    warn!("feed connect timed out");
                    return SessionEnd::Dropped { lived: Duration::ZERO };
                }
            },
            _ = self.shutdown.changed() => return SessionEnd::Shutdown,
        };

        info!(url = %self.ws_url, "feed connected");
        let connected_at = std::time::Instant::now();
        let (mut write, mut read) = stream.split();

        // Subscribe to every (symbol, timeframe) pair.
        for sub in &self.subscriptions {
            let topic = kline_topic(&sub.symbol, sub.timeframe);
            let message = json!({ "op": "SUBSCRIBE", "topic": topic }).to_string();
            if let Err(e) = write.send(Message::Text(message)).await {
                warn!(error = %e, "feed subscribe failed");
                return SessionEnd::Dropped {
                    lived: connected_at.elapsed(),
                };
            }
        }

        // A reconnect is only trustworthy after reconciliation.
        if self.has_streamed {
            self.state = FeedState::Reconciling;
            if self.events.send(FeedEvent::Reconcile).await.is_err() {
                return SessionEnd::Shutdown;
            }
        }
        self.state = FeedState::Streaming;
        self.has_streamed = true;

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    if *self.shutdown.borrow() {
                        return SessionEnd::Shutdown;
                    }
                }
                message = read.next() => match message {
                    Some(Ok(Message::Text(text))) => {
                        match parse_message(&text) {
                            Ok(Some(event)) => {
                                if self.events.send(event).await.is_err() {
                                    return SessionEnd::Shutdown;
                                }
                            }
                            Ok(None) => {}
                            Err(e) => warn!(error = %e, "unparseable feed message"),
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        if write.send(Message::Pong(payload)).await.is_err() {
                            return SessionEnd::Dropped { lived: connected_at.elapsed() };
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        return SessionEnd::Dropped { lived: connected_at.elapsed() };
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "feed read error");
                        return SessionEnd::Dropped { lived: connected_at.elapsed() };
                    }
                }
            }
        }
    }
}

enum SessionEnd {
    Shutdown,
    Dropped { lived: Duration },
}

fn kline_topic(symbol: &str, timeframe: Timeframe) -> String {
    format!(
        "KLINE_{}_{}",
        timeframe.to_string().to_ascii_uppercase(),
        symbol
    )
}

// Wire formats.

#[derive(Debug, Deserialize)]
#[serde(tag = "topic", rename_all = "SCREAMING_SNAKE_CASE")]
enum FeedMessage {
    Kline(KlineMessage),
    Ticker(TickerMessage),
    Fill(FillMessage),
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KlineMessage {
    symbol: String,
    interval: String,
    time: i64,
    open: String,
    high: String,
    low: String,
    close: String,
    volume: String,
    closed: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TickerMessage {
    symbol: String,
    close: String,
    bid: String,
    ask: String,
    time: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FillMessage {
    fill_id: String,
    order_id: String,
    symbol: String,
    side: String,
    size: Decimal,
    price: Decimal,
    fee: Decimal,
    sequence: u64,
    time: i64,
}

fn parse_number(value: &str) -> Result<f64, ExchangeError> {
    value
        .parse()
        .map_err(|_| ExchangeError::Malformed(format!("bad numeric field: {value}")))
}

/// Parse one text frame into a feed event. Unknown topics are skipped.
fn parse_message(text: &str) -> Result<Option<FeedEvent>, ExchangeError> {
    let message: FeedMessage =
        serde_json::from_str(text).map_err(|e| ExchangeError::Malformed(e.to_string()))?;

    match message {
        FeedMessage::Kline(k) => {
            let timeframe: Timeframe = k
                .interval
                .to_ascii_lowercase()
                .parse()
                .map_err(|_| ExchangeError::Malformed(format!("bad interval: {}", k.interval)))?;
            let mut candle = Candle::new(
                k.time,
                parse_number(&k.open)?,
                parse_number(&k.high)?,
                parse_number(&k.low)?,
                parse_number(&k.close)?,
                parse_number(&k.volume)?,
            );
            candle.closed = k.closed;
            Ok(Some(FeedEvent::Candle {
                symbol: k.symbol,
                timeframe,
                candle,
            }))
        }
        FeedMessage::Ticker(t) => Ok(Some(FeedEvent::Ticker(Ticker {
            symbol: t.symbol,
            last: parse_number(&t.close)?,
            bid: parse_number(&t.bid)?,
            ask: parse_number(&t.ask)?,
            timestamp: t.time,
        }))),
        FeedMessage::Fill(f) => {
            let side = match f.side.as_str() {
                "BUY" => Side::Buy,
                "SELL" => Side::Sell,
                other => {
                    return Err(ExchangeError::Malformed(format!("unknown side: {other}")))
                }
            };
            Ok(Some(FeedEvent::Fill(Fill {
                id: f.fill_id,
                order_id: f.order_id,
                symbol: f.symbol,
                side,
                quantity: f.size,
                price: f.price,
                fee: f.fee,
                sequence: f.sequence,
                timestamp: Utc
                    .timestamp_millis_opt(f.time)
                    .single()
                    .unwrap_or_else(Utc::now),
            })))
        }
        FeedMessage::Unknown => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kline_topic_format() {
        assert_eq!(kline_topic("BTC_USDT", Timeframe::Minute5), "KLINE_5M_BTC_USDT");
        assert_eq!(kline_topic("ETH_USDT", Timeframe::Hour1), "KLINE_1H_ETH_USDT");
    }

    #[test]
    fn test_parse_kline_message() {
        let text = r#"{
            "topic": "KLINE", "symbol": "BTC_USDT", "interval": "5M",
            "time": 1700000000000, "open": "30000", "high": "30100",
            "low": "29900", "close": "30050", "volume": "12.5", "closed": true
        }"#;
        match parse_message(text).unwrap() {
            Some(FeedEvent::Candle {
                symbol,
                timeframe,
                candle,
            }) => {
                assert_eq!(symbol, "BTC_USDT");
                assert_eq!(timeframe, Timeframe::Minute5);
                assert!(candle.closed);
                assert_eq!(candle.close, 30050.0);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_parse_fill_message() {
        let text = r#"{
            "topic": "FILL", "fillId": "f1", "orderId": "o1", "symbol": "BTC_USDT",
            "side": "SELL", "size": "0.5", "price": "30000", "fee": "0.3",
            "sequence": 42, "time": 1700000000000
        }"#;
        match parse_message(text).unwrap() {
            Some(FeedEvent::Fill(fill)) => {
                assert_eq!(fill.sequence, 42);
                assert_eq!(fill.side, Side::Sell);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_topic_skipped() {
        let text = r#"{"topic": "HEARTBEAT"}"#;
        assert!(parse_message(text).unwrap().is_none());
    }

    #[test]
    fn test_garbage_is_malformed() {
        assert!(parse_message("not json").is_err());
    }
}
