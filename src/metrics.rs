//! Metrics sink capability.
//!
//! The session counts heartbeats through this narrow trait so unit tests
//! can substitute an in-memory double. Exposition of the Prometheus
//! registry over HTTP lives in the binary.

use std::collections::HashMap;

use parking_lot::Mutex;
use prometheus::{IntCounterVec, Opts, Registry};

/// Heartbeat counter, safe to call from any task.
pub trait MetricsSink: Send + Sync {
    fn inc_heartbeat(&self, session_id: &str, product: &str);
}

/// Prometheus-backed sink exposing `feed_heartbeat{uuid,market}`.
pub struct PrometheusSink {
    heartbeats: IntCounterVec,
}

impl PrometheusSink {
    pub fn new(registry: &Registry) -> prometheus::Result<Self> {
        let heartbeats = IntCounterVec::new(
            Opts::new("heartbeat", "Counts heartbeats from the websocket feed")
                .namespace("feed"),
            &["uuid", "market"],
        )?;
        registry.register(Box::new(heartbeats.clone()))?;
        Ok(Self { heartbeats })
    }
}

impl MetricsSink for PrometheusSink {
    fn inc_heartbeat(&self, session_id: &str, product: &str) {
        self.heartbeats
            .with_label_values(&[session_id, product])
            .inc();
    }
}

/// In-memory sink for tests.
#[derive(Debug, Default)]
pub struct InMemorySink {
    counts: Mutex<HashMap<(String, String), u64>>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn heartbeats(&self, session_id: &str, product: &str) -> u64 {
        self.counts
            .lock()
            .get(&(session_id.to_owned(), product.to_owned()))
            .copied()
            .unwrap_or(0)
    }
}

impl MetricsSink for InMemorySink {
    fn inc_heartbeat(&self, session_id: &str, product: &str) {
        *self
            .counts
            .lock()
            .entry((session_id.to_owned(), product.to_owned()))
            .or_insert(0) += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_sink_counts_per_session_and_product() {
        let sink = InMemorySink::new();
        sink.inc_heartbeat("a", "ETH-DAI");
        sink.inc_heartbeat("a", "ETH-DAI");
        sink.inc_heartbeat("a", "BTC-USD");

        assert_eq!(sink.heartbeats("a", "ETH-DAI"), 2);
        assert_eq!(sink.heartbeats("a", "BTC-USD"), 1);
        assert_eq!(sink.heartbeats("b", "ETH-DAI"), 0);
    }

    #[test]
    fn prometheus_sink_registers_the_counter_family() {
        let registry = Registry::new();
        let sink = PrometheusSink::new(&registry).unwrap();
        sink.inc_heartbeat("a", "ETH-DAI");

        let families = registry.gather();
        assert_eq!(families.len(), 1);
        assert_eq!(families[0].get_name(), "feed_heartbeat");
    }
}
