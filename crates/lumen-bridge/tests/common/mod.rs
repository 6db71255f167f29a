//! Shared helpers for bridge integration tests

#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use lumen_bridge::{BridgeServer, SessionTable};
use lumen_core::Message;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message as Frame;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Serve `server` on an ephemeral port
pub async fn start(server: BridgeServer) -> (SocketAddr, Arc<SessionTable>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let sessions = server.sessions();
    tokio::spawn(server.serve_on(listener));
    (addr, sessions)
}

/// Minimal WebSocket client speaking the envelope protocol
pub struct TestClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl TestClient {
    pub async fn connect(addr: SocketAddr, instance_id: &str, platform: &str) -> Self {
        let url = format!("ws://{addr}/ws/{instance_id}?platform={platform}");
        let (ws, _) = connect_async(url).await.unwrap();
        Self { ws }
    }

    pub async fn send(&mut self, message: &Message) {
        self.send_raw(message.to_json().unwrap()).await;
    }

    pub async fn send_raw(&mut self, text: impl Into<String>) {
        self.ws.send(Frame::Text(text.into())).await.unwrap();
    }

    /// Next protocol message; panics after [`RECV_TIMEOUT`]
    pub async fn recv(&mut self) -> Message {
        tokio::time::timeout(RECV_TIMEOUT, self.next_message())
            .await
            .expect("timed out waiting for a message")
            .expect("connection closed")
    }

    /// `None` once the server closed the connection
    pub async fn next_message(&mut self) -> Option<Message> {
        while let Some(frame) = self.ws.next().await {
            match frame.ok()? {
                Frame::Text(text) => return Some(Message::from_json(&text).unwrap()),
                Frame::Close(_) => return None,
                _ => continue,
            }
        }
        None
    }

    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}

/// Poll `condition` until it holds or [`RECV_TIMEOUT`] passes
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
