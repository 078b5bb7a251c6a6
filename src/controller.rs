//! Per-product controller.
//!
//! Binds one orderbook engine and one feed session, routes decoded events
//! into the engine, and exposes the four quote operations by delegation.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::{FeedError, QuoteError, Result};
use crate::metrics::MetricsSink;
use crate::orderbook::{Orderbook, Quote};
use crate::parser::{levels_to_updates, split_changes, FeedMessage};
use crate::websocket::{FeedSession, SessionState, EVENT_QUEUE_CAPACITY};

/// How often zero-size levels are swept out of the book.
const COMPACT_INTERVAL: Duration = Duration::from_secs(30);

/// Owns the engine and session for one product.
///
/// `start` spawns the session and the dispatch task; it must be called
/// from within a tokio runtime and succeeds once per controller. `stop`
/// cancels both tasks and is idempotent.
pub struct FeedController {
    product: String,
    id: String,
    endpoint: String,
    reconnect_delay: Duration,
    book: Arc<RwLock<Orderbook>>,
    clock: Arc<dyn Clock>,
    metrics: Arc<dyn MetricsSink>,
    cancel: CancellationToken,
    started: AtomicBool,
    events_tx: broadcast::Sender<FeedMessage>,
    command_tx: mpsc::Sender<serde_json::Value>,
    command_rx: Mutex<Option<mpsc::Receiver<serde_json::Value>>>,
    session_state: Mutex<Option<watch::Receiver<SessionState>>>,
}

impl FeedController {
    pub fn new(
        product: impl Into<String>,
        config: &Config,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self::with_clock(product, config, metrics, Arc::new(SystemClock))
    }

    pub fn with_clock(
        product: impl Into<String>,
        config: &Config,
        metrics: Arc<dyn MetricsSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let product = product.into();
        let (events_tx, _) = broadcast::channel(EVENT_QUEUE_CAPACITY);
        let (command_tx, command_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        Self {
            id: Uuid::new_v4().to_string(),
            book: Arc::new(RwLock::new(Orderbook::with_clock(
                product.clone(),
                clock.clone(),
            ))),
            product,
            endpoint: config.ws_endpoint.clone(),
            reconnect_delay: config.reconnect_delay(),
            clock,
            metrics,
            cancel: CancellationToken::new(),
            started: AtomicBool::new(false),
            events_tx,
            command_tx,
            command_rx: Mutex::new(Some(command_rx)),
            session_state: Mutex::new(None),
        }
    }

    /// Stable identifier used as the metrics label.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn product(&self) -> &str {
        &self.product
    }

    /// Launch the session and the event dispatch task.
    pub fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(FeedError::AlreadyStarted);
        }
        let command_rx = self
            .command_rx
            .lock()
            .take()
            .ok_or(FeedError::AlreadyStarted)?;

        let (session, state_rx) = FeedSession::new(
            self.product.clone(),
            self.id.clone(),
            self.endpoint.clone(),
            self.reconnect_delay,
            self.events_tx.clone(),
            command_rx,
            self.cancel.child_token(),
            self.metrics.clone(),
        );
        *self.session_state.lock() = Some(state_rx);

        // Subscribe the dispatch task before the session can produce events.
        let events_rx = self.events_tx.subscribe();
        tokio::spawn(session.run());
        tokio::spawn(dispatch_events(
            self.book.clone(),
            self.clock.clone(),
            events_rx,
            self.cancel.child_token(),
            self.product.clone(),
        ));
        Ok(())
    }

    /// Fire the shared cancellation signal. Double-stop is a no-op.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Last observed session lifecycle state, if started.
    pub fn session_state(&self) -> Option<SessionState> {
        self.session_state.lock().as_ref().map(|rx| *rx.borrow())
    }

    /// Queue a caller-supplied frame for the active connection.
    pub fn send_frame(&self, frame: serde_json::Value) -> Result<()> {
        self.command_tx
            .try_send(frame)
            .map_err(|err| FeedError::Message(err.to_string()))
    }

    pub fn buy_quote(&self, amount: f64) -> std::result::Result<Quote, QuoteError> {
        self.book.read().buy_quote(amount)
    }

    pub fn sell_quote(&self, amount: f64) -> std::result::Result<Quote, QuoteError> {
        self.book.read().sell_quote(amount)
    }

    pub fn buy_base(&self, amount: f64) -> std::result::Result<Quote, QuoteError> {
        self.book.read().buy_base(amount)
    }

    pub fn sell_base(&self, amount: f64) -> std::result::Result<Quote, QuoteError> {
        self.book.read().sell_base(amount)
    }

    pub fn book_count(&self) -> (usize, usize) {
        self.book.read().book_count()
    }
}

/// Consume decoded events and apply them to the book until shutdown.
async fn dispatch_events(
    book: Arc<RwLock<Orderbook>>,
    clock: Arc<dyn Clock>,
    mut events: broadcast::Receiver<FeedMessage>,
    cancel: CancellationToken,
    product: String,
) {
    let mut compact_timer = tokio::time::interval(COMPACT_INTERVAL);
    compact_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    compact_timer.reset();
    let mut unknown_seen = HashSet::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                warn!(product = %product, "controller event loop shut down");
                break;
            }
            _ = compact_timer.tick() => {
                book.write().compact();
            }
            event = events.recv() => match event {
                Ok(message) => handle_event(&book, &clock, &mut unknown_seen, &product, message),
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    warn!(product = %product, dropped = count, "event queue overflowed, dropped oldest events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

fn handle_event(
    book: &RwLock<Orderbook>,
    clock: &Arc<dyn Clock>,
    unknown_seen: &mut HashSet<String>,
    product: &str,
    message: FeedMessage,
) {
    match message {
        FeedMessage::Snapshot(snapshot) => {
            let bids = levels_to_updates(snapshot.bids);
            let asks = levels_to_updates(snapshot.asks);
            let (num_bids, num_asks) = (bids.len(), asks.len());
            book.write().apply_snapshot(clock.now_epoch(), &bids, &asks);
            info!(product = %product, num_bids, num_asks, "set new snapshot");
        }
        FeedMessage::L2Update(update) => {
            let (bids, asks) = split_changes(update.changes);
            book.write().apply_delta(clock.now_epoch(), &bids, &asks);
        }
        // Heartbeats are counted by the session; acks carry nothing.
        FeedMessage::Heartbeat(_) | FeedMessage::Subscriptions => {}
        FeedMessage::Unknown(kind) => {
            if unknown_seen.insert(kind.clone()) {
                warn!(product = %product, message_type = %kind, "received an unexpected message");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::metrics::InMemorySink;
    use crate::orderbook::Update;
    use crate::parser::{L2UpdateMessage, SnapshotMessage};
    use futures_util::{SinkExt, StreamExt};
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;
    use tokio_tungstenite::tungstenite::protocol::Message;

    fn test_config(endpoint: &str) -> Config {
        Config {
            products: vec!["ETH-DAI".to_owned()],
            ws_endpoint: endpoint.to_owned(),
            metrics_addr: "127.0.0.1:0".to_owned(),
            reconnect_delay_ms: 50,
        }
    }

    async fn wait_for_book(controller: &FeedController, expected: (usize, usize)) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
        while controller.book_count() != expected {
            assert!(
                tokio::time::Instant::now() < deadline,
                "book never reached {expected:?}"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn start_is_not_repeatable_and_stop_is_idempotent() {
        let controller = FeedController::new(
            "ETH-DAI",
            &test_config("ws://127.0.0.1:9"),
            Arc::new(InMemorySink::new()),
        );
        controller.start().unwrap();
        assert!(matches!(
            controller.start(),
            Err(FeedError::AlreadyStarted)
        ));
        controller.stop();
        controller.stop();
    }

    /// End to end through a started controller: the queued frame reaches
    /// the wire after the subscription, the snapshot lands in the book,
    /// and all four quote operations answer through the delegation path.
    #[tokio::test]
    async fn quotes_and_frames_flow_through_a_started_controller() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();

            let frame = ws.next().await.unwrap().unwrap();
            let subscribe: serde_json::Value =
                serde_json::from_str(frame.to_text().unwrap()).unwrap();
            assert_eq!(subscribe["type"], "subscribe");
            assert_eq!(subscribe["product_ids"][0], "ETH-DAI");

            let frame = ws.next().await.unwrap().unwrap();
            let forwarded: serde_json::Value =
                serde_json::from_str(frame.to_text().unwrap()).unwrap();
            assert_eq!(forwarded, serde_json::json!({"type": "ping"}));

            ws.send(Message::Text(
                r#"{"type":"snapshot","product_id":"ETH-DAI","bids":[["333.2","0.5"],["320","0.5"],["310","1.5"]],"asks":[["335.12","0.5"]]}"#
                    .to_owned(),
            ))
            .await
            .unwrap();
            while ws.next().await.is_some() {}
        });

        let controller = FeedController::new(
            "ETH-DAI",
            &test_config(&format!("ws://{addr}")),
            Arc::new(InMemorySink::new()),
        );
        controller.start().unwrap();
        controller
            .send_frame(serde_json::json!({"type": "ping"}))
            .unwrap();

        wait_for_book(&controller, (3, 1)).await;

        assert_eq!(controller.sell_base(0.6).unwrap().amount, 198.6);
        assert_eq!(controller.buy_base(0.2).unwrap().amount, 67.024);
        assert_eq!(controller.buy_quote(166.6).unwrap().amount, 0.5);
        assert_eq!(controller.sell_quote(167.56).unwrap().amount, 0.5);

        controller.stop();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while controller.session_state() != Some(SessionState::Stopped) {
            assert!(
                tokio::time::Instant::now() < deadline,
                "session never stopped"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        server.abort();
    }

    #[test]
    fn dispatch_routes_snapshots_and_deltas_into_the_book() {
        let book = Arc::new(RwLock::new(Orderbook::ungated("ETH-DAI")));
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(100));
        let mut unknown_seen = HashSet::new();

        handle_event(
            &book,
            &clock,
            &mut unknown_seen,
            "ETH-DAI",
            FeedMessage::Snapshot(SnapshotMessage {
                product_id: "ETH-DAI".to_owned(),
                bids: vec![("333.2".to_owned(), "0.5".to_owned())],
                asks: vec![],
            }),
        );
        assert_eq!(book.read().book_count(), (1, 0));
        assert_eq!(book.read().last_epoch(), 100);

        handle_event(
            &book,
            &clock,
            &mut unknown_seen,
            "ETH-DAI",
            FeedMessage::L2Update(L2UpdateMessage {
                product_id: "ETH-DAI".to_owned(),
                changes: vec![
                    ("buy".to_owned(), "320".to_owned(), "0.5".to_owned()),
                    ("sell".to_owned(), "335.12".to_owned(), "0.5".to_owned()),
                ],
                time: None,
            }),
        );
        assert_eq!(book.read().book_count(), (2, 1));

        // Unknown tags are remembered so each is only logged once.
        handle_event(
            &book,
            &clock,
            &mut unknown_seen,
            "ETH-DAI",
            FeedMessage::Unknown("ticker".to_owned()),
        );
        handle_event(
            &book,
            &clock,
            &mut unknown_seen,
            "ETH-DAI",
            FeedMessage::Unknown("ticker".to_owned()),
        );
        assert_eq!(unknown_seen.len(), 1);
    }

    /// 32 readers hammer the quote operations while one writer applies
    /// 10 000 random deltas plus periodic snapshots and compactions.
    #[test]
    fn concurrent_reads_and_writes_keep_the_book_coherent() {
        fn next(rng: &mut u64) -> u64 {
            *rng = rng
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            *rng >> 33
        }

        let book = Arc::new(RwLock::new(Orderbook::ungated("ETH-DAI")));
        book.write().apply_snapshot(
            0,
            &[Update::new("100", "1.0")],
            &[Update::new("101", "1.0")],
        );

        let stop = Arc::new(AtomicBool::new(false));
        let readers: Vec<_> = (0..32)
            .map(|seed| {
                let book = book.clone();
                let stop = stop.clone();
                std::thread::spawn(move || {
                    let mut rng = 0x9e3779b97f4a7c15u64 ^ (seed as u64);
                    while !stop.load(Ordering::Relaxed) {
                        let amount = (next(&mut rng) % 1_000) as f64 / 100.0 + 0.01;
                        let guard = book.read();
                        let result = match next(&mut rng) % 4 {
                            0 => guard.buy_quote(amount),
                            1 => guard.sell_quote(amount),
                            2 => guard.buy_base(amount),
                            _ => guard.sell_base(amount),
                        };
                        if let Ok(quote) = result {
                            assert!(quote.amount.is_finite() && quote.amount >= 0.0);
                        }
                    }
                })
            })
            .collect();

        let writer = {
            let book = book.clone();
            std::thread::spawn(move || {
                let mut rng = 0x51_7c_c1_b7u64;
                for epoch in 0..10_000i64 {
                    let price = format!("{}", 50 + next(&mut rng) % 150);
                    let size = format!("{:.2}", (next(&mut rng) % 300) as f64 / 100.0);
                    let update = [Update::new(price, size)];
                    let mut guard = book.write();
                    if next(&mut rng) % 2 == 0 {
                        guard.apply_delta(epoch, &update, &[]);
                    } else {
                        guard.apply_delta(epoch, &[], &update);
                    }
                    if epoch % 1_000 == 0 {
                        guard.apply_snapshot(
                            epoch,
                            &[Update::new("100", "1.0")],
                            &[Update::new("101", "1.0")],
                        );
                    }
                    if epoch % 500 == 0 {
                        guard.compact();
                    }
                }
            })
        };

        writer.join().expect("writer panicked");
        stop.store(true, Ordering::Relaxed);
        for reader in readers {
            reader.join().expect("reader panicked");
        }

        let guard = book.read();
        guard.validate_invariants();
        assert_eq!(guard.last_epoch(), 9_999);
    }
}
