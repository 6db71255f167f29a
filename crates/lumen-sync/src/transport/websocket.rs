//! WebSocket transport using tungstenite

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use lumen_core::{Envelope, LumenError, Result};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as Frame;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;
use url::Url;

use super::{SyncConnection, SyncTransport};

/// WebSocket transport handler
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    connect_timeout: Duration,
    write_timeout: Duration,
}

impl WebSocketTransport {
    pub fn new(connect_timeout: Duration, write_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            write_timeout,
        }
    }
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(10), Duration::from_secs(10))
    }
}

#[async_trait]
impl SyncTransport for WebSocketTransport {
    async fn connect(&self, url: &Url) -> Result<Box<dyn SyncConnection>> {
        let (stream, response) = timeout(self.connect_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| LumenError::transport("WebSocket connect timeout"))?
            .map_err(|e| LumenError::transport(format!("WebSocket connect failed: {e}")))?;

        debug!(url = %url, status = %response.status(), "WebSocket connected");

        Ok(Box::new(WebSocketConnection {
            stream,
            write_timeout: self.write_timeout,
        }))
    }
}

/// One client-side WebSocket connection
pub struct WebSocketConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    write_timeout: Duration,
}

#[async_trait]
impl SyncConnection for WebSocketConnection {
    async fn send(&mut self, envelope: Envelope) -> Result<()> {
        let text = envelope.to_json()?;
        timeout(self.write_timeout, self.stream.send(Frame::Text(text)))
            .await
            .map_err(|_| LumenError::transport("WebSocket send timeout"))?
            .map_err(|e| LumenError::transport(format!("WebSocket send failed: {e}")))
    }

    async fn recv(&mut self) -> Option<Result<Envelope>> {
        loop {
            let frame = match self.stream.next().await? {
                Ok(frame) => frame,
                Err(e) => {
                    return Some(Err(LumenError::transport(format!(
                        "WebSocket receive failed: {e}"
                    ))))
                }
            };

            match frame {
                Frame::Text(text) => return Some(Envelope::from_json(&text)),
                Frame::Binary(data) => {
                    let parsed = std::str::from_utf8(&data)
                        .map_err(|e| LumenError::protocol(format!("binary frame is not UTF-8: {e}")))
                        .and_then(Envelope::from_json);
                    return Some(parsed);
                }
                Frame::Close(frame) => {
                    debug!(?frame, "WebSocket closed by peer");
                    return None;
                }
                // tungstenite answers pings itself
                Frame::Ping(_) | Frame::Pong(_) | Frame::Frame(_) => continue,
            }
        }
    }

    async fn close(&mut self) {
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "client closing".into(),
        };
        if let Err(e) = self.stream.close(Some(frame)).await {
            debug!(error = %e, "WebSocket close failed");
        }
    }
}
