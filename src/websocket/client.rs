//! WebSocket connection wrapper.
//!
//! Dials the streaming endpoint, sends the subscription frame, and hands
//! the split halves to the session.

use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::debug;

use crate::error::{FeedError, Result};
use crate::parser::SubscribeRequest;

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
pub(crate) type WsSink = SplitSink<WsStream, Message>;
pub(crate) type WsSource = SplitStream<WsStream>;

const DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// An active connection with the subscription frame already sent.
pub struct FeedConnection {
    pub(crate) write: WsSink,
    pub(crate) read: WsSource,
}

impl FeedConnection {
    /// Dial `endpoint` and subscribe `product` to its channels.
    pub async fn open(endpoint: &str, product: &str) -> Result<Self> {
        let (stream, response) = tokio::time::timeout(DIAL_TIMEOUT, connect_async(endpoint))
            .await
            .map_err(|_| FeedError::ConnectionTimeout)?
            .map_err(|err| FeedError::Connection(format!("failed to connect: {err}")))?;

        debug!(status = ?response.status(), "websocket connected");

        let (mut write, read) = stream.split();
        let frame = serde_json::to_string(&SubscribeRequest::for_product(product))?;
        write
            .send(Message::Text(frame))
            .await
            .map_err(|err| FeedError::Message(err.to_string()))?;

        Ok(Self { write, read })
    }
}

/// Serialize a caller-supplied frame and put it on the wire.
pub(crate) async fn send_json(write: &mut WsSink, frame: &serde_json::Value) -> Result<()> {
    let text = serde_json::to_string(frame)?;
    write
        .send(Message::Text(text))
        .await
        .map_err(|err| FeedError::Message(err.to_string()))
}
