//! Feed session: per-product connection state machine.
//!
//! Owns one streaming connection at a time. A reader task decodes frames
//! onto an internal queue; the coordinator selects over shutdown, outbound
//! frames, inbound frames and a four second inactivity deadline, recycling
//! the connection when the deadline fires. After any reconnect the next
//! snapshot wholesale replaces the book, so no delta replay is attempted.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use futures_util::{SinkExt, StreamExt};

use super::client::{send_json, FeedConnection, WsSource};
use crate::error::{FeedError, Result};
use crate::metrics::MetricsSink;
use crate::parser::FeedMessage;

/// Inactivity window after which the connection is recycled.
pub const WATCHDOG_TIMEOUT: Duration = Duration::from_secs(4);

/// Capacity of the event queue toward the controller. When the consumer
/// lags further than this, the oldest pending events are dropped.
pub const EVENT_QUEUE_CAPACITY: usize = 20;

/// Ceiling for the reconnect backoff.
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Where a session is in its connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Subscribed,
    Streaming,
    WatchdogFired,
    Reconnecting,
    Stopped,
}

/// Frames surfaced by the reader task to the coordinator.
enum WireEvent {
    Message(FeedMessage),
    Ping(Vec<u8>),
}

/// Per-product session driving one connection and its watchdog.
pub struct FeedSession {
    product: String,
    session_id: String,
    endpoint: String,
    reconnect_delay: Duration,
    events: broadcast::Sender<FeedMessage>,
    commands: mpsc::Receiver<serde_json::Value>,
    cancel: CancellationToken,
    metrics: Arc<dyn MetricsSink>,
    state: watch::Sender<SessionState>,
}

impl FeedSession {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        product: impl Into<String>,
        session_id: impl Into<String>,
        endpoint: impl Into<String>,
        reconnect_delay: Duration,
        events: broadcast::Sender<FeedMessage>,
        commands: mpsc::Receiver<serde_json::Value>,
        cancel: CancellationToken,
        metrics: Arc<dyn MetricsSink>,
    ) -> (Self, watch::Receiver<SessionState>) {
        let (state, state_rx) = watch::channel(SessionState::Idle);
        let session = Self {
            product: product.into(),
            session_id: session_id.into(),
            endpoint: endpoint.into(),
            reconnect_delay,
            events,
            commands,
            cancel,
            metrics,
            state,
        };
        (session, state_rx)
    }

    /// Drive the session until the cancellation token fires.
    pub async fn run(mut self) {
        let mut backoff = self.reconnect_delay;
        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            match self.connect_and_stream(&mut backoff).await {
                Ok(()) => break,
                Err(err) => {
                    warn!(
                        product = %self.product,
                        error = %err,
                        delay_ms = backoff.as_millis() as u64,
                        "session disconnected, reconnecting"
                    );
                    set_state(&self.state, SessionState::Reconnecting);
                    if self.wait_backoff(backoff).await {
                        break;
                    }
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
        set_state(&self.state, SessionState::Stopped);
        info!(product = %self.product, "session stopped");
    }

    /// Sleep out the reconnect delay. Outbound frames arriving while
    /// disconnected are dropped with a warning. Returns true on shutdown.
    async fn wait_backoff(&mut self, delay: Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return true,
                _ = &mut sleep => return false,
                command = self.commands.recv() => match command {
                    Some(frame) => warn!(
                        product = %self.product,
                        frame = %frame,
                        "dropping outbound frame while disconnected"
                    ),
                    None => return true,
                },
            }
        }
    }

    /// One connection lifetime: dial, subscribe, stream until the watchdog
    /// fires, the wire breaks, or the session is stopped. Returns Ok only
    /// on shutdown.
    async fn connect_and_stream(&mut self, backoff: &mut Duration) -> Result<()> {
        set_state(&self.state, SessionState::Connecting);
        let FeedConnection { mut write, read } =
            FeedConnection::open(&self.endpoint, &self.product).await?;
        set_state(&self.state, SessionState::Subscribed);
        *backoff = self.reconnect_delay;
        info!(product = %self.product, endpoint = %self.endpoint, "subscribed to feed");

        let (frame_tx, mut frames) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let reader_cancel = self.cancel.child_token();
        let reader = tokio::spawn(read_frames(read, frame_tx, reader_cancel.clone()));

        let state = &self.state;
        let events = &self.events;
        let metrics = &self.metrics;
        let product = &self.product;
        let session_id = &self.session_id;
        let cancel = self.cancel.clone();

        let result = loop {
            tokio::select! {
                _ = cancel.cancelled() => break Ok(()),
                command = self.commands.recv() => match command {
                    Some(frame) => {
                        if let Err(err) = send_json(&mut write, &frame).await {
                            break Err(err);
                        }
                    }
                    // The controller went away; treat it as shutdown.
                    None => break Ok(()),
                },
                frame = frames.recv() => match frame {
                    Some(WireEvent::Ping(payload)) => {
                        set_state(state, SessionState::Streaming);
                        if let Err(err) = write.send(Message::Pong(payload)).await {
                            break Err(FeedError::Message(err.to_string()));
                        }
                    }
                    Some(WireEvent::Message(message)) => {
                        set_state(state, SessionState::Streaming);
                        forward_event(events, metrics, session_id, product, message);
                    }
                    None => break Err(FeedError::Connection("stream ended".to_owned())),
                },
                _ = tokio::time::sleep(WATCHDOG_TIMEOUT) => {
                    warn!(product = %product, "no inbound frame within watchdog window, recycling connection");
                    set_state(state, SessionState::WatchdogFired);
                    break Err(FeedError::ConnectionTimeout);
                }
            }
        };

        // The session is the sole owner of the connection; close it before
        // reconnecting or returning.
        reader_cancel.cancel();
        let _ = write.close().await;
        reader.abort();
        result
    }
}

fn set_state(state: &watch::Sender<SessionState>, next: SessionState) {
    state.send_if_modified(|current| {
        if *current != next {
            *current = next;
            true
        } else {
            false
        }
    });
}

/// Count heartbeats and fan the message out to the controller queue.
fn forward_event(
    events: &broadcast::Sender<FeedMessage>,
    metrics: &Arc<dyn MetricsSink>,
    session_id: &str,
    product: &str,
    message: FeedMessage,
) {
    if matches!(message, FeedMessage::Heartbeat(_)) {
        metrics.inc_heartbeat(session_id, product);
    }
    if events.send(message).is_err() {
        warn!(product = %product, "no consumer for feed events, dropping the message");
    }
}

/// Pull frames off the read half and decode them onto the internal queue.
async fn read_frames(
    mut read: WsSource,
    frames: mpsc::Sender<WireEvent>,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = read.next() => next,
        };
        match next {
            Some(Ok(Message::Text(text))) => match FeedMessage::parse(&text) {
                Ok(message) => {
                    if frames.send(WireEvent::Message(message)).await.is_err() {
                        break;
                    }
                }
                Err(err) => warn!(error = %err, "failed to decode frame"),
            },
            Some(Ok(Message::Binary(data))) => {
                let text = String::from_utf8_lossy(&data);
                match FeedMessage::parse(&text) {
                    Ok(message) => {
                        if frames.send(WireEvent::Message(message)).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => warn!(error = %err, "failed to decode binary frame"),
                }
            }
            Some(Ok(Message::Ping(payload))) => {
                if frames.send(WireEvent::Ping(payload)).await.is_err() {
                    break;
                }
            }
            Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {}
            Some(Ok(Message::Close(frame))) => {
                warn!(frame = ?frame, "received close frame");
                break;
            }
            Some(Err(err)) => {
                error!(error = %err, "websocket read error");
                break;
            }
            None => {
                warn!("websocket stream ended");
                break;
            }
        }
    }
}
