//! Configuration module for the feed.

use std::env;
use std::time::Duration;

use crate::error::{FeedError, Result};

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Products to subscribe to (e.g., ["BTC-USD", "ETH-USD"])
    pub products: Vec<String>,

    /// WebSocket endpoint of the exchange feed
    pub ws_endpoint: String,

    /// Bind address for the metrics and health HTTP server
    pub metrics_addr: String,

    /// Base delay before a reconnect attempt
    pub reconnect_delay_ms: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let products: Vec<String> = env::var("PRODUCTS")
            .unwrap_or_else(|_| "BTC-USD,ETH-USD".to_string())
            .split(',')
            .map(|product| product.trim().to_uppercase())
            .filter(|product| !product.is_empty())
            .collect();

        if products.is_empty() {
            return Err(FeedError::Config("no products configured".to_string()));
        }
        for product in &products {
            if product.split('-').count() != 2 {
                return Err(FeedError::Config(format!(
                    "product {product:?} is not a BASE-QUOTE pair"
                )));
            }
        }

        Ok(Self {
            products,
            ws_endpoint: env::var("WS_ENDPOINT")
                .unwrap_or_else(|_| "wss://ws-feed.pro.coinbase.com".to_string()),
            metrics_addr: env::var("METRICS_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:2112".to_string()),
            reconnect_delay_ms: env::var("RECONNECT_DELAY_MS")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()
                .unwrap_or(1000),
        })
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            products: vec!["BTC-USD".to_string()],
            ws_endpoint: "wss://ws-feed.pro.coinbase.com".to_string(),
            metrics_addr: "0.0.0.0:2112".to_string(),
            reconnect_delay_ms: 1000,
        }
    }
}
