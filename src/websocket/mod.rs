//! Streaming connection to the exchange.

mod client;
mod session;

pub use client::FeedConnection;
pub use session::{FeedSession, SessionState, EVENT_QUEUE_CAPACITY, WATCHDOG_TIMEOUT};
