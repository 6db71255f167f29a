//! In-memory transport
//!
//! [`MemoryTransport`] implements the sync transport seam over channels. Every
//! accepted connection produces a [`ServerEnd`] that a test drives by hand:
//! reading what the client sent, pushing messages back, injecting garbage, or
//! hanging up.

use async_trait::async_trait;
use lumen_core::time::now_millis;
use lumen_core::{Envelope, LumenError, Message, Result};
use lumen_sync::{SyncConnection, SyncTransport};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use url::Url;

#[derive(Debug)]
struct Inner {
    attempts: AtomicU32,
    refuse_all: AtomicBool,
    refuse_next: AtomicU32,
    urls: Mutex<Vec<Url>>,
    accepted_tx: mpsc::UnboundedSender<ServerEnd>,
    accepted_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<ServerEnd>>,
}

/// Scriptable in-memory transport
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    inner: Arc<Inner>,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    pub fn new() -> Self {
        let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                attempts: AtomicU32::new(0),
                refuse_all: AtomicBool::new(false),
                refuse_next: AtomicU32::new(0),
                urls: Mutex::new(Vec::new()),
                accepted_tx,
                accepted_rx: tokio::sync::Mutex::new(accepted_rx),
            }),
        }
    }

    /// Transport that refuses every connection
    pub fn refusing() -> Self {
        let transport = Self::new();
        transport.refuse_all(true);
        transport
    }

    /// Refuse (or stop refusing) every connection attempt
    pub fn refuse_all(&self, refuse: bool) {
        self.inner.refuse_all.store(refuse, Ordering::SeqCst);
    }

    /// Refuse the next `count` attempts
    pub fn refuse_next(&self, count: u32) {
        self.inner.refuse_next.store(count, Ordering::SeqCst);
    }

    /// Connection attempts so far, refused ones included
    pub fn attempts(&self) -> u32 {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    /// URLs of every attempt, in order
    pub fn urls(&self) -> Vec<Url> {
        self.inner.urls.lock().clone()
    }

    /// Wait for the next accepted connection
    pub async fn accept(&self) -> ServerEnd {
        self.inner
            .accepted_rx
            .lock()
            .await
            .recv()
            .await
            .expect("transport dropped")
    }

    /// Like [`accept`](Self::accept) but gives up after `within`
    pub async fn accept_within(&self, within: Duration) -> Option<ServerEnd> {
        tokio::time::timeout(within, self.accept()).await.ok()
    }

    fn should_refuse(&self) -> bool {
        if self.inner.refuse_all.load(Ordering::SeqCst) {
            return true;
        }
        self.inner
            .refuse_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl SyncTransport for MemoryTransport {
    async fn connect(&self, url: &Url) -> Result<Box<dyn SyncConnection>> {
        self.inner.attempts.fetch_add(1, Ordering::SeqCst);
        self.inner.urls.lock().push(url.clone());
        if self.should_refuse() {
            return Err(LumenError::transport("connection refused"));
        }

        let (to_server, from_client) = mpsc::unbounded_channel();
        let (to_client, from_server) = mpsc::unbounded_channel();
        let server = ServerEnd {
            url: url.clone(),
            inbound: from_client,
            outbound: Some(to_client),
        };
        self.inner
            .accepted_tx
            .send(server)
            .map_err(|_| LumenError::transport("listener gone"))?;

        Ok(Box::new(MemoryConnection {
            outbound: Some(to_server),
            inbound: from_server,
        }))
    }
}

/// Client half of an in-memory connection
#[derive(Debug)]
pub struct MemoryConnection {
    outbound: Option<mpsc::UnboundedSender<String>>,
    inbound: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl SyncConnection for MemoryConnection {
    async fn send(&mut self, envelope: Envelope) -> Result<()> {
        let text = envelope.to_json()?;
        match &self.outbound {
            Some(tx) => tx
                .send(text)
                .map_err(|_| LumenError::transport("connection reset by peer")),
            None => Err(LumenError::transport("connection closed")),
        }
    }

    async fn recv(&mut self) -> Option<Result<Envelope>> {
        let text = self.inbound.recv().await?;
        Some(Envelope::from_json(&text))
    }

    async fn close(&mut self) {
        self.outbound = None;
        self.inbound.close();
    }
}

/// Server half of an in-memory connection
#[derive(Debug)]
pub struct ServerEnd {
    url: Url,
    inbound: mpsc::UnboundedReceiver<String>,
    outbound: Option<mpsc::UnboundedSender<String>>,
}

impl ServerEnd {
    /// URL the client connected to
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Next envelope from the client, `None` once it closed
    pub async fn recv(&mut self) -> Option<Envelope> {
        let text = self.inbound.recv().await?;
        Some(Envelope::from_json(&text).expect("client sent a malformed envelope"))
    }

    /// Next typed message from the client
    pub async fn recv_message(&mut self) -> Option<Message> {
        let envelope = self.recv().await?;
        Some(Message::from_envelope(&envelope).expect("client sent an unknown message"))
    }

    /// Next message that is not a heartbeat
    pub async fn recv_non_heartbeat(&mut self) -> Option<Message> {
        loop {
            match self.recv_message().await? {
                Message::Ping | Message::Pong => continue,
                other => return Some(other),
            }
        }
    }

    /// Push a message to the client; `false` if the client is gone
    pub fn send(&self, message: &Message) -> bool {
        let text = message
            .to_envelope(now_millis())
            .and_then(|envelope| envelope.to_json())
            .expect("message encodes");
        self.send_raw(text)
    }

    /// Push an arbitrary text frame
    pub fn send_raw(&self, text: impl Into<String>) -> bool {
        self.outbound
            .as_ref()
            .map_or(false, |tx| tx.send(text.into()).is_ok())
    }

    /// Hang up; the client sees the connection close
    pub fn close(&mut self) {
        self.outbound = None;
        self.inbound.close();
    }

    pub fn is_open(&self) -> bool {
        self.outbound.as_ref().is_some_and(|tx| !tx.is_closed())
    }
}
