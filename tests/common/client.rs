//! Test client for the JSON-over-WebSocket protocol.

#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

/// One WebSocket client session.
pub struct TestClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl TestClient {
    /// Connect with the token in the URL query.
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let (ws, _response) = connect_async(url).await?;
        Ok(Self { ws })
    }

    /// Send a raw frame.
    pub async fn send(&mut self, frame: Value) -> anyhow::Result<()> {
        self.ws.send(WsMessage::Text(frame.to_string())).await?;
        Ok(())
    }

    /// Receive the next JSON frame, replying to protocol pings along the
    /// way.
    pub async fn recv(&mut self) -> anyhow::Result<Value> {
        loop {
            let message = tokio::time::timeout(Duration::from_secs(5), self.ws.next())
                .await
                .map_err(|_| anyhow::anyhow!("timed out waiting for frame"))?
                .ok_or_else(|| anyhow::anyhow!("connection closed"))??;

            match message {
                WsMessage::Text(text) => {
                    let value: Value = serde_json::from_str(&text)?;
                    if value["type"] == "ping" {
                        self.send(json!({"type": "pong"})).await?;
                        continue;
                    }
                    return Ok(value);
                }
                WsMessage::Ping(payload) => {
                    self.ws.send(WsMessage::Pong(payload)).await?;
                }
                WsMessage::Close(_) => {
                    anyhow::bail!("connection closed by server");
                }
                _ => continue,
            }
        }
    }

    /// Receive with a short timeout; `Ok(None)` when nothing arrives.
    pub async fn try_recv(&mut self, wait: Duration) -> anyhow::Result<Option<Value>> {
        match tokio::time::timeout(wait, self.recv()).await {
            Ok(Ok(value)) => Ok(Some(value)),
            Ok(Err(e)) => Err(e),
            Err(_) => Ok(None),
        }
    }

    /// Read frames until one matches the predicate.
    pub async fn recv_until(
        &mut self,
        mut predicate: impl FnMut(&Value) -> bool,
    ) -> anyhow::Result<Value> {
        loop {
            let frame = self.recv().await?;
            if predicate(&frame) {
                return Ok(frame);
            }
        }
    }

    /// Wait for the next `ack` frame.
    pub async fn recv_ack(&mut self) -> anyhow::Result<Value> {
        self.recv_until(|v| v["type"] == "ack").await
    }

    /// Wait for the next `error` frame.
    pub async fn recv_error(&mut self) -> anyhow::Result<Value> {
        self.recv_until(|v| v["type"] == "error").await
    }

    /// Send a text message to a room.
    pub async fn send_message(&mut self, room: &str, content: &str) -> anyhow::Result<()> {
        self.send(json!({
            "type": "message",
            "data": { "room": room, "content": content },
        }))
        .await
    }

    /// Join a room.
    pub async fn join(&mut self, room: &str) -> anyhow::Result<()> {
        self.send(json!({ "type": "join", "data": { "room": room } }))
            .await
    }

    /// Close the session cleanly.
    pub async fn close(mut self) -> anyhow::Result<()> {
        self.ws.close(None).await?;
        Ok(())
    }
}
