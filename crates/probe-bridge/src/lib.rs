//! The one-directional channel between the in-page probe and the host.
//!
//! Two message shapes cross it: a start announcing a request the moment it
//! leaves the page, and a settle carrying the outcome. Delivery is
//! best-effort and asynchronous; ordering is guaranteed per request only.
//! Payloads decode leniently, a missing optional field is never an error.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

use stack_normalizer::StackFrame;
use webtap_core_types::{RequestId, RequestKind};

/// Announces a request the probe just released toward the network.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartEvent {
    pub id: RequestId,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub url: String,
    #[serde(default, deserialize_with = "lenient_kind")]
    pub kind: RequestKind,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_preview: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stack_frames: Vec<StackFrame>,
}

/// Carries the outcome of a previously announced request. Either the
/// response fields or `error` are populated, never meaningfully both.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleEvent {
    pub id: RequestId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_text: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_preview: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Envelope crossing the bridge, tagged so raw payloads self-describe.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TapMessage {
    Start(StartEvent),
    Settle(SettleEvent),
}

impl TapMessage {
    pub fn id(&self) -> &RequestId {
        match self {
            TapMessage::Start(event) => &event.id,
            TapMessage::Settle(event) => &event.id,
        }
    }
}

fn default_method() -> String {
    "GET".to_string()
}

fn lenient_kind<'de, D>(deserializer: D) -> Result<RequestKind, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.map(|kind| RequestKind::from_wire(&kind)).unwrap_or_default())
}

/// Faults surfaced to hosts feeding the bridge from raw payloads.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("malformed bridge payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Decode one raw JSON payload as delivered by a script boundary.
pub fn decode_message(payload: &str) -> Result<TapMessage, BridgeError> {
    Ok(serde_json::from_str(payload)?)
}

/// Emit side of the bridge; cloned into every wrapped primitive.
#[derive(Clone)]
pub struct BridgeHandle {
    tx: mpsc::UnboundedSender<TapMessage>,
}

impl BridgeHandle {
    /// Fire-and-forget. A bridge whose receiver is gone drops the message;
    /// transport faults must never surface into page code.
    pub fn emit(&self, message: TapMessage) {
        if self.tx.send(message).is_err() {
            debug!(target: "probe-bridge", "receiver gone, message dropped");
        }
    }
}

/// Host side of the bridge.
pub struct BridgeReceiver {
    rx: mpsc::UnboundedReceiver<TapMessage>,
}

impl BridgeReceiver {
    /// `None` once every handle is dropped and the queue is drained.
    pub async fn recv(&mut self) -> Option<TapMessage> {
        self.rx.recv().await
    }
}

/// Build an unbounded probe-to-host bridge. Unbounded is deliberate: the
/// capture path applies no flow control, the host keeps up or buffers.
pub fn channel() -> (BridgeHandle, BridgeReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (BridgeHandle { tx }, BridgeReceiver { rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_full_start_payload() {
        let payload = r#"{
            "type": "start",
            "id": "r1",
            "method": "POST",
            "url": "https://api.test/orders",
            "kind": "fetch",
            "headers": {"Content-Type": "application/json"},
            "bodyPreview": "{\"sku\":1}",
            "stackFrames": [{"function": "buy", "file": "https://api.test/a.js", "line": 3, "column": 9}]
        }"#;
        let message = decode_message(payload).expect("decode start");
        let TapMessage::Start(event) = message else {
            panic!("expected start");
        };
        assert_eq!(event.id, RequestId::from("r1"));
        assert_eq!(event.method, "POST");
        assert_eq!(event.kind, RequestKind::Fetch);
        assert_eq!(
            event.headers.get("Content-Type").map(String::as_str),
            Some("application/json")
        );
        assert_eq!(event.stack_frames.len(), 1);
        assert_eq!(event.stack_frames[0].function.as_deref(), Some("buy"));
    }

    #[test]
    fn decodes_minimal_start_with_defaults() {
        let message = decode_message(r#"{"type": "start", "id": "r2"}"#).expect("decode");
        let TapMessage::Start(event) = message else {
            panic!("expected start");
        };
        assert_eq!(event.method, "GET");
        assert_eq!(event.url, "");
        assert_eq!(event.kind, RequestKind::Other);
        assert!(event.headers.is_empty());
        assert!(event.body_preview.is_none());
        assert!(event.stack_frames.is_empty());
    }

    #[test]
    fn unknown_kind_decodes_as_other() {
        let message =
            decode_message(r#"{"type": "start", "id": "r3", "kind": "beacon"}"#).expect("decode");
        let TapMessage::Start(event) = message else {
            panic!("expected start");
        };
        assert_eq!(event.kind, RequestKind::Other);
    }

    #[test]
    fn decodes_minimal_settle() {
        let message = decode_message(r#"{"type": "settle", "id": "r4"}"#).expect("decode");
        let TapMessage::Settle(event) = message else {
            panic!("expected settle");
        };
        assert!(event.status.is_none());
        assert!(event.error.is_none());
        assert!(event.headers.is_empty());
    }

    #[test]
    fn rejects_payload_without_id() {
        assert!(decode_message(r#"{"type": "settle"}"#).is_err());
        assert!(decode_message("not json").is_err());
    }

    #[test]
    fn serializes_with_wire_field_names() {
        let event = SettleEvent {
            id: RequestId::from("r5"),
            status: Some(200),
            status_text: Some("OK".to_string()),
            headers: BTreeMap::new(),
            body_preview: Some("hello".to_string()),
            error: None,
        };
        let value = serde_json::to_value(TapMessage::Settle(event)).expect("serialize");
        assert_eq!(value["type"], "settle");
        assert_eq!(value["statusText"], "OK");
        assert_eq!(value["bodyPreview"], "hello");
        assert!(value.get("error").is_none());
    }

    #[tokio::test]
    async fn delivers_in_order_per_sender() {
        let (handle, mut receiver) = channel();
        handle.emit(TapMessage::Start(StartEvent {
            id: RequestId::from("r6"),
            method: "GET".to_string(),
            url: "https://a.test/".to_string(),
            kind: RequestKind::Fetch,
            headers: BTreeMap::new(),
            body_preview: None,
            stack_frames: Vec::new(),
        }));
        handle.emit(TapMessage::Settle(SettleEvent {
            id: RequestId::from("r6"),
            status: Some(204),
            status_text: None,
            headers: BTreeMap::new(),
            body_preview: None,
            error: None,
        }));
        drop(handle);

        let first = receiver.recv().await.expect("first message");
        assert!(matches!(first, TapMessage::Start(_)));
        let second = receiver.recv().await.expect("second message");
        assert!(matches!(second, TapMessage::Settle(_)));
        assert!(receiver.recv().await.is_none());
    }

    #[test]
    fn emit_without_receiver_is_silent() {
        let (handle, receiver) = channel();
        drop(receiver);
        handle.emit(TapMessage::Settle(SettleEvent {
            id: RequestId::from("r7"),
            status: None,
            status_text: None,
            headers: BTreeMap::new(),
            body_preview: None,
            error: None,
        }));
    }
}
