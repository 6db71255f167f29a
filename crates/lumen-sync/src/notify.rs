//! Typed notification channel
//!
//! Each [`SyncClient`](crate::SyncClient) owns one broadcast channel. Observers
//! subscribe explicitly and receive plain data; the sync layer never holds a
//! reference back into whoever is listening.

use lumen_core::protocol::{QueryResponsePayload, StateResponsePayload, StatusPayload};
use lumen_core::{ExperienceId, Injection, SessionId, StateSnapshot};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

/// Connection lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Not connected and not trying
    Disconnected,
    /// One connection attempt in flight
    Connecting,
    /// Connection open; heartbeat running
    Connected,
    /// Waiting out the backoff delay before the next attempt
    Reconnecting,
    /// Gave up; local processing only until a manual reset
    Standalone,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Standalone => "standalone",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a Sync Client reports to its observers
#[derive(Debug, Clone, PartialEq)]
pub enum SyncNotification {
    /// Local state changed (local Experience or adopted server push)
    StateChanged(StateSnapshot),
    /// Lifecycle transition
    ConnectionChanged {
        from: ConnectionState,
        to: ConnectionState,
    },
    /// Server accepted the connection
    Connected {
        session_id: SessionId,
        capabilities: Vec<String>,
        backend_available: bool,
    },
    /// Server pushed a state; `adopted` says whether it replaced local state
    AuthoritativeState {
        state: StateSnapshot,
        degraded: bool,
        adopted: bool,
    },
    /// Answer to `request_state`
    StateReport(StateResponsePayload),
    /// Server confirmed receipt of an Experience
    ExperienceAcknowledged(ExperienceId),
    /// Buffer overflow evicted an Experience before it was delivered
    ExperienceDropped(ExperienceId),
    /// Injection status transition reported by the server
    InjectionUpdate(Injection),
    /// Answer to `query`
    QueryAnswered(QueryResponsePayload),
    /// Server-side backend availability changed
    BackendStatus(StatusPayload),
    /// Server reported an error; the connection is kept
    ServerError(String),
    /// A malformed or unexpected frame was dropped
    ProtocolViolation(String),
    /// Reconnect attempts ran out; the client is now standalone
    Exhausted { attempts: u32 },
}

/// Sending half of the notification channel
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: broadcast::Sender<SyncNotification>,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish to current subscribers; having none is not an error
    pub fn publish(&self, notification: SyncNotification) {
        let _ = self.tx.send(notification);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncNotification> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_each_subscriber() {
        let notifier = Notifier::new(8);
        let mut a = notifier.subscribe();
        let mut b = notifier.subscribe();

        notifier.publish(SyncNotification::Exhausted { attempts: 5 });

        assert_eq!(a.recv().await.unwrap(), SyncNotification::Exhausted { attempts: 5 });
        assert_eq!(b.recv().await.unwrap(), SyncNotification::Exhausted { attempts: 5 });
    }

    #[test]
    fn test_publish_without_subscribers() {
        let notifier = Notifier::new(1);
        notifier.publish(SyncNotification::ServerError("ignored".into()));
        assert_eq!(notifier.subscriber_count(), 0);
    }
}
