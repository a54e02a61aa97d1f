//! newHeads push subscription over WebSocket JSON-RPC.
//!
//! The subscribe request doubles as the support probe: if the endpoint
//! does not answer the `eth_subscribe` within the timeout, the caller
//! falls back to polling.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use cairn_core::{Error, Result};

use crate::abi::parse_quantity;

/// An active newHeads subscription.
///
/// Dropping the subscription tears down the socket task.
pub struct HeadSubscription {
    heads: mpsc::UnboundedReceiver<u64>,
    task: JoinHandle<()>,
}

impl HeadSubscription {
    /// Next head block number, or `None` once the socket closes.
    pub async fn next_head(&mut self) -> Option<u64> {
        self.heads.recv().await
    }

    /// Tear down the socket.
    pub fn close(&self) {
        self.task.abort();
    }
}

impl Drop for HeadSubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Extract the head block number from one socket message, if it belongs
/// to `subscription_id`.
fn head_number(text: &str, subscription_id: &str) -> Option<u64> {
    let value: Value = serde_json::from_str(text).ok()?;
    if value.get("method")?.as_str()? != "eth_subscription" {
        return None;
    }
    let params = value.get("params")?;
    if params.get("subscription")?.as_str()? != subscription_id {
        return None;
    }
    let number = params.get("result")?.get("number")?.as_str()?;
    parse_quantity(number).ok()
}

/// Subscribe to newHeads, probing support within `timeout`.
///
/// The probe uses request id 1; any failure (connect, refusal, timeout)
/// surfaces as `Transport` so callers can fall back to polling.
pub async fn subscribe_new_heads(ws_url: &str, timeout: Duration) -> Result<HeadSubscription> {
    let (mut socket, _) = tokio::time::timeout(timeout, connect_async(ws_url))
        .await
        .map_err(|_| Error::transport("websocket connect timed out"))?
        .map_err(|e| Error::transport(format!("websocket connect: {e}")))?;

    let request = json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "eth_subscribe",
        "params": ["newHeads"],
    });
    socket
        .send(Message::Text(request.to_string()))
        .await
        .map_err(|e| Error::transport(format!("eth_subscribe send: {e}")))?;

    let subscription_id = tokio::time::timeout(timeout, async {
        while let Some(message) = socket.next().await {
            let message = message.map_err(|e| Error::transport(format!("websocket read: {e}")))?;
            let Message::Text(text) = message else {
                continue;
            };
            let value: Value = serde_json::from_str(&text)
                .map_err(|e| Error::transport(format!("malformed subscribe reply: {e}")))?;
            if value.get("id").and_then(Value::as_u64) != Some(1) {
                continue;
            }
            if let Some(err) = value.get("error").filter(|e| !e.is_null()) {
                return Err(Error::transport(format!("eth_subscribe refused: {err}")));
            }
            return value
                .get("result")
                .and_then(Value::as_str)
                .map(str::to_owned)
                .ok_or_else(|| Error::transport("eth_subscribe reply missing id"));
        }
        Err(Error::transport("websocket closed during subscribe"))
    })
    .await
    .map_err(|_| Error::transport("eth_subscribe probe timed out"))??;

    debug!(subscription = %subscription_id, "newHeads subscription established");

    let (tx, heads) = mpsc::unbounded_channel();
    let task = tokio::spawn(async move {
        while let Some(message) = socket.next().await {
            match message {
                Ok(Message::Text(text)) => {
                    if let Some(number) = head_number(&text, &subscription_id) {
                        if tx.send(number).is_err() {
                            break;
                        }
                    }
                }
                Ok(Message::Ping(payload)) => {
                    let _ = socket.send(Message::Pong(payload)).await;
                }
                Ok(Message::Close(_)) | Err(_) => {
                    warn!("newHeads socket closed");
                    break;
                }
                Ok(_) => {}
            }
        }
    });

    Ok(HeadSubscription { heads, task })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn head_number_matches_only_its_subscription() {
        let message = r#"{
            "jsonrpc": "2.0",
            "method": "eth_subscription",
            "params": {
                "subscription": "0xcafe",
                "result": {"number": "0x10", "hash": "0xaa"}
            }
        }"#;
        assert_eq!(head_number(message, "0xcafe"), Some(16));
        assert_eq!(head_number(message, "0xbeef"), None);
    }

    #[test]
    fn head_number_ignores_other_messages() {
        assert_eq!(head_number(r#"{"id":1,"result":"0xcafe"}"#, "0xcafe"), None);
        assert_eq!(head_number("not json", "0xcafe"), None);
        assert_eq!(
            head_number(r#"{"method":"eth_subscription","params":{}}"#, "0xcafe"),
            None
        );
    }
}
