//! Transport seam for the Sync Client
//!
//! The client never opens sockets itself. It is handed a [`SyncTransport`] at
//! construction and asks it for one [`SyncConnection`] per attempt, so tests can
//! substitute an in-memory transport and production uses [`WebSocketTransport`].

mod websocket;

pub use websocket::{WebSocketConnection, WebSocketTransport};

use async_trait::async_trait;
use lumen_core::{Envelope, Result};
use url::Url;

/// Opens connections to a sync endpoint
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Open one full-duplex connection
    async fn connect(&self, url: &Url) -> Result<Box<dyn SyncConnection>>;
}

/// One open full-duplex connection
#[async_trait]
pub trait SyncConnection: Send {
    /// Send one envelope; errors are transport errors
    async fn send(&mut self, envelope: Envelope) -> Result<()>;

    /// Next inbound envelope, or `None` once the peer has closed
    ///
    /// Malformed frames yield `Some(Err(LumenError::Protocol))` and the connection
    /// stays usable. Must be cancel-safe: it is polled inside `select!`.
    async fn recv(&mut self) -> Option<Result<Envelope>>;

    /// Close the connection, ignoring errors
    async fn close(&mut self);
}
