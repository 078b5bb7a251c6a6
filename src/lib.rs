//! Live L2 orderbook feed with synthetic market-order quote queries.
//!
//! This crate maintains an in-memory level-2 book per subscribed product,
//! fed by a streaming exchange subscription with watchdog and reconnect
//! handling, and answers four quote operations by sweeping the book.

pub mod clock;
pub mod config;
pub mod controller;
pub mod error;
pub mod metrics;
pub mod orderbook;
pub mod parser;
pub mod websocket;

pub use clock::{Clock, SystemClock};
pub use config::Config;
pub use controller::FeedController;
pub use error::{FeedError, QuoteError, Result};
pub use metrics::{InMemorySink, MetricsSink, PrometheusSink};
pub use orderbook::{Orderbook, Quote, Update};
pub use parser::FeedMessage;
pub use websocket::{FeedSession, SessionState};
