//! Error types for the feed.

use thiserror::Error;

/// Feed-level errors
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("websocket connection error: {0}")]
    Connection(String),

    #[error("websocket message error: {0}")]
    Message(String),

    #[error("failed to parse message: {0}")]
    Parse(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("malformed product id: {0}")]
    MalformedProduct(String),

    #[error("controller is already started and cannot be restarted")]
    AlreadyStarted,

    #[error("connection timeout")]
    ConnectionTimeout,
}

impl From<tokio_tungstenite::tungstenite::Error> for FeedError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        FeedError::Connection(err.to_string())
    }
}

impl From<serde_json::Error> for FeedError {
    fn from(err: serde_json::Error) -> Self {
        FeedError::Parse(err.to_string())
    }
}

/// Failures surfaced to quote callers.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteError {
    /// No snapshot has ever been applied, so the book is inaccurate.
    #[error("a snapshot was never set, the orderbook is inaccurate")]
    NotInitialized,

    /// The most recent accepted mutation is too old.
    #[error("orderbook is stale")]
    Stale,

    /// The requested amount was not a positive number.
    #[error("amount invalid")]
    InvalidAmount,

    /// The sweep exhausted the book before filling the request.
    #[error("insufficient liquidity")]
    InsufficientLiquidity,

    /// Sweep accounting went negative. Never expected; signals a bug.
    #[error("implementation error")]
    InternalInvariant,
}

pub type Result<T> = std::result::Result<T, FeedError>;
