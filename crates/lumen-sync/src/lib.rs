//! Lumen Sync - keeps one instance's evolving state in sync with a bridge
//!
//! The [`SyncClient`] owns a persistent full-duplex connection and drives the
//! `Disconnected -> Connecting -> Connected <-> Reconnecting -> Standalone`
//! lifecycle. Local processing never waits for the network: Experiences are
//! evolved immediately, buffered, and replayed in order once a connection opens.
//!
//! Transports are injected ([`SyncTransport`]); [`WebSocketTransport`] is the
//! production implementation.

#![allow(missing_docs)]
#![forbid(unsafe_code)]

/// Reconnect backoff
pub mod backoff;

/// Offline Experience queue
pub mod buffer;

/// Client handle and connection actor
pub mod client;

/// Client configuration
pub mod config;

/// Observer notifications and connection states
pub mod notify;

/// Transport seam and the WebSocket implementation
pub mod transport;

pub use backoff::ReconnectPolicy;
pub use buffer::{DrainReport, ExperienceBuffer, ExperienceSink, DEFAULT_BUFFER_CAPACITY};
pub use client::SyncClient;
pub use config::SyncClientConfig;
pub use notify::{ConnectionState, Notifier, SyncNotification};
pub use transport::{SyncConnection, SyncTransport, WebSocketConnection, WebSocketTransport};
