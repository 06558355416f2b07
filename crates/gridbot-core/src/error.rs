//! Error types for the trading engine.

use thiserror::Error;

use crate::types::RejectReason;

/// Top-level engine error.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Strategy error: {0}")]
    Strategy(#[from] StrategyError),

    #[error("Exchange error: {0}")]
    Exchange(#[from] ExchangeError),

    #[error("Data error: {0}")]
    Data(#[from] DataError),

    #[error("Indicator error: {0}")]
    Indicator(#[from] IndicatorError),

    #[error("Risk error: {0}")]
    Risk(#[from] RiskError),

    #[error("Execution failed and outcome is unknown: {0}")]
    ExecutionFatal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Strategy-specific errors.
#[derive(Error, Debug)]
pub enum StrategyError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Insufficient data: need {required} candles, have {available}")]
    InsufficientData { required: usize, available: usize },

    #[error("Unknown strategy kind: {0}")]
    UnknownKind(String),

    #[error("Strategy error: {0}")]
    Internal(String),
}

/// Errors from the exchange connection (REST or streaming).
#[derive(Error, Debug)]
pub enum ExchangeError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Rate limited (retry after {retry_after_secs:?} seconds)")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Order rejected: {reason}")]
    OrderRejected { reason: RejectReason },

    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Position not found: {0}")]
    PositionNotFound(String),

    #[error("Unknown symbol: {0}")]
    UnknownSymbol(String),

    #[error("Server error (HTTP {status}): {body}")]
    Server { status: u16, body: String },

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Stream error: {0}")]
    Stream(String),
}

impl ExchangeError {
    /// Whether a retry with backoff can reasonably succeed.
    ///
    /// Rejections, auth failures and malformed payloads are deterministic
    /// and must never be retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ExchangeError::Connection(_)
                | ExchangeError::Timeout(_)
                | ExchangeError::RateLimited { .. }
                | ExchangeError::Server { .. }
                | ExchangeError::Stream(_)
        )
    }
}

/// Risk management errors.
#[derive(Error, Debug)]
pub enum RiskError {
    #[error("Invalid risk parameter: {0}")]
    InvalidParameter(String),

    #[error("Order blocked: {reason}")]
    Blocked { reason: String },

    #[error("Account state unavailable: {0}")]
    AccountUnavailable(String),
}

/// Data source errors.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Symbol not found: {0}")]
    SymbolNotFound(String),

    #[error("No data available for the requested range")]
    NoDataAvailable,

    #[error("Gap in candle stream: expected open time {expected}, got {actual}")]
    CandleGap { expected: i64, actual: i64 },

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Data source error: {0}")]
    Internal(String),
}

/// Indicator calculation errors.
#[derive(Error, Debug)]
pub enum IndicatorError {
    #[error("Insufficient data: need {required} points, have {available}")]
    InsufficientData { required: usize, available: usize },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
