//! Parser module for the exchange's JSON text frames.
//!
//! Inbound frames are discriminated on their top-level `type` field and
//! decoded into typed payloads; anything unrecognized becomes
//! [`FeedMessage::Unknown`] for the dispatcher to log and drop. Price and
//! size fields stay textual here and are parsed at book ingest.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::orderbook::Update;

/// A full replacement image of both sides of the book.
#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotMessage {
    #[serde(default)]
    pub product_id: String,
    pub bids: Vec<(String, String)>,
    pub asks: Vec<(String, String)>,
}

/// An incremental batch of `[side, price, size]` level changes.
#[derive(Debug, Clone, Deserialize)]
pub struct L2UpdateMessage {
    #[serde(default)]
    pub product_id: String,
    pub changes: Vec<(String, String, String)>,
    /// Exchange-supplied timestamp, decoded but not trusted for epochs.
    #[serde(default)]
    pub time: Option<String>,
}

/// Liveness signal for one product.
#[derive(Debug, Clone, Deserialize)]
pub struct HeartbeatMessage {
    #[serde(default)]
    pub product_id: String,
}

/// Decoded inbound frame.
#[derive(Debug, Clone)]
pub enum FeedMessage {
    Snapshot(SnapshotMessage),
    L2Update(L2UpdateMessage),
    Heartbeat(HeartbeatMessage),
    /// Subscription acknowledgement; carries nothing the feed acts on.
    Subscriptions,
    /// Any other `type` tag.
    Unknown(String),
}

impl FeedMessage {
    /// Decode a raw text frame.
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        let value: serde_json::Value = serde_json::from_str(raw)?;
        let kind = value
            .get("type")
            .and_then(|tag| tag.as_str())
            .unwrap_or("")
            .to_owned();
        match kind.as_str() {
            "snapshot" => Ok(FeedMessage::Snapshot(serde_json::from_value(value)?)),
            "l2update" => Ok(FeedMessage::L2Update(serde_json::from_value(value)?)),
            "heartbeat" => Ok(FeedMessage::Heartbeat(serde_json::from_value(value)?)),
            "subscriptions" => Ok(FeedMessage::Subscriptions),
            _ => Ok(FeedMessage::Unknown(kind)),
        }
    }
}

/// Wire `[price, size]` text pairs into book updates.
pub fn levels_to_updates(levels: Vec<(String, String)>) -> Vec<Update> {
    levels
        .into_iter()
        .map(|(price, size)| Update { price, size })
        .collect()
}

/// Split an l2update batch into bid and ask updates; `buy` changes route
/// to the bids, `sell` to the asks.
pub fn split_changes(changes: Vec<(String, String, String)>) -> (Vec<Update>, Vec<Update>) {
    let mut bids = Vec::new();
    let mut asks = Vec::new();
    for (side, price, size) in changes {
        match side.as_str() {
            "buy" => bids.push(Update { price, size }),
            "sell" => asks.push(Update { price, size }),
            other => warn!(side = %other, "skipped change with unrecognized side"),
        }
    }
    (bids, asks)
}

/// Channel entry in a subscribe frame, either a bare name or an object
/// scoping the channel to specific products.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ChannelSpec {
    Name(String),
    WithProducts {
        name: String,
        product_ids: Vec<String>,
    },
}

/// Outbound subscription frame.
#[derive(Debug, Clone, Serialize)]
pub struct SubscribeRequest {
    #[serde(rename = "type")]
    pub message_type: String,
    pub product_ids: Vec<String>,
    pub channels: Vec<ChannelSpec>,
}

impl SubscribeRequest {
    /// Subscribe one product to the level2, heartbeat and ticker channels.
    pub fn for_product(product: &str) -> Self {
        Self {
            message_type: "subscribe".to_owned(),
            product_ids: vec![product.to_owned()],
            channels: vec![
                ChannelSpec::Name("level2".to_owned()),
                ChannelSpec::Name("heartbeat".to_owned()),
                ChannelSpec::WithProducts {
                    name: "ticker".to_owned(),
                    product_ids: vec![product.to_owned()],
                },
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_snapshot() {
        let raw = r#"{
            "type": "snapshot",
            "product_id": "ETH-DAI",
            "bids": [["333.2", "0.5"], ["320", "0.5"]],
            "asks": [["335.12", "0.5"]]
        }"#;

        match FeedMessage::parse(raw).unwrap() {
            FeedMessage::Snapshot(snapshot) => {
                assert_eq!(snapshot.product_id, "ETH-DAI");
                assert_eq!(snapshot.bids.len(), 2);
                assert_eq!(snapshot.bids[0], ("333.2".to_owned(), "0.5".to_owned()));
                assert_eq!(snapshot.asks.len(), 1);
            }
            other => panic!("expected snapshot, got {other:?}"),
        }
    }

    #[test]
    fn parses_l2update() {
        let raw = r#"{
            "type": "l2update",
            "product_id": "ETH-DAI",
            "changes": [["buy", "333.2", "0.7"], ["sell", "335.12", "0"]],
            "time": "2019-08-14T20:42:27.265Z"
        }"#;

        match FeedMessage::parse(raw).unwrap() {
            FeedMessage::L2Update(update) => {
                assert_eq!(update.product_id, "ETH-DAI");
                assert_eq!(update.changes.len(), 2);
                assert_eq!(update.time.as_deref(), Some("2019-08-14T20:42:27.265Z"));
            }
            other => panic!("expected l2update, got {other:?}"),
        }
    }

    #[test]
    fn parses_heartbeat_and_subscriptions() {
        let heartbeat = r#"{"type":"heartbeat","product_id":"ETH-DAI","sequence":90}"#;
        assert!(matches!(
            FeedMessage::parse(heartbeat).unwrap(),
            FeedMessage::Heartbeat(_)
        ));

        let ack = r#"{"type":"subscriptions","channels":[{"name":"level2","product_ids":["ETH-DAI"]}]}"#;
        assert!(matches!(
            FeedMessage::parse(ack).unwrap(),
            FeedMessage::Subscriptions
        ));
    }

    #[test]
    fn unrecognized_types_become_unknown() {
        match FeedMessage::parse(r#"{"type":"ticker","price":"333.2"}"#).unwrap() {
            FeedMessage::Unknown(kind) => assert_eq!(kind, "ticker"),
            other => panic!("expected unknown, got {other:?}"),
        }

        // A frame without a type tag is unknown too, not an error.
        assert!(matches!(
            FeedMessage::parse(r#"{"price":"333.2"}"#).unwrap(),
            FeedMessage::Unknown(kind) if kind.is_empty()
        ));
    }

    #[test]
    fn invalid_json_is_an_error() {
        assert!(FeedMessage::parse("not json").is_err());
    }

    #[test]
    fn splits_changes_by_side() {
        let (bids, asks) = split_changes(vec![
            ("buy".into(), "333.2".into(), "0.5".into()),
            ("sell".into(), "335.12".into(), "0.5".into()),
            ("hold".into(), "1".into(), "1".into()),
        ]);
        assert_eq!(bids, vec![Update::new("333.2", "0.5")]);
        assert_eq!(asks, vec![Update::new("335.12", "0.5")]);
    }

    #[test]
    fn subscribe_frame_has_the_expected_shape() {
        let frame = serde_json::to_value(SubscribeRequest::for_product("ETH-DAI")).unwrap();
        assert_eq!(
            frame,
            serde_json::json!({
                "type": "subscribe",
                "product_ids": ["ETH-DAI"],
                "channels": [
                    "level2",
                    "heartbeat",
                    {"name": "ticker", "product_ids": ["ETH-DAI"]}
                ]
            })
        );
    }
}
