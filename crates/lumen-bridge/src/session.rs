//! Session table
//!
//! The only state shared between connection handlers. Each entry is one
//! ConnectionSession plus the Injections keyed to it; removing the entry removes
//! both, and removal happens at most once per session.
//!
//! Alongside the sessions the table holds the newest state seen for every
//! instance. That entry outlives the sessions that produced it and is what the
//! HTTP fallback answers from.

use lumen_core::{Injection, InjectionId, SessionId, StateSnapshot};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Whether a platform tag denotes a mobile client
pub fn is_mobile(platform: &str) -> bool {
    let platform = platform.to_ascii_lowercase();
    platform == "ios" || platform == "android" || platform.starts_with("mobile")
}

/// One accepted client connection
#[derive(Debug, Clone)]
pub struct ConnectionSession {
    pub session_id: SessionId,
    pub instance_id: String,
    pub platform: String,
    pub is_mobile: bool,
    pub connected_at: u64,
    pub last_activity: u64,
    pub backend_connected: bool,
    pub experiences: u64,
    pub latest_state: Option<StateSnapshot>,
    injections: HashMap<InjectionId, Injection>,
}

impl ConnectionSession {
    fn new(instance_id: String, platform: String, now: u64) -> Self {
        Self {
            session_id: SessionId::new(),
            is_mobile: is_mobile(&platform),
            instance_id,
            platform,
            connected_at: now,
            last_activity: now,
            backend_connected: false,
            experiences: 0,
            latest_state: None,
            injections: HashMap::new(),
        }
    }

    pub fn injections(&self) -> impl Iterator<Item = &Injection> {
        self.injections.values()
    }

    fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.session_id,
            instance_id: self.instance_id.clone(),
            platform: self.platform.clone(),
            is_mobile: self.is_mobile,
            connected_at: self.connected_at,
            last_activity: self.last_activity,
            backend_connected: self.backend_connected,
            experiences: self.experiences,
            injections: self.injections.len(),
            latest_state: self.latest_state.clone(),
        }
    }
}

/// Read-only view served by `/api/sessions`
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub instance_id: String,
    pub platform: String,
    pub is_mobile: bool,
    pub connected_at: u64,
    pub last_activity: u64,
    pub backend_connected: bool,
    pub experiences: u64,
    pub injections: usize,
    pub latest_state: Option<StateSnapshot>,
}

/// Concurrent map of live sessions
#[derive(Debug)]
pub struct SessionTable {
    sessions: Mutex<HashMap<SessionId, ConnectionSession>>,
    held: Mutex<HashMap<String, StateSnapshot>>,
    max_sessions: usize,
}

impl SessionTable {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            held: Mutex::new(HashMap::new()),
            max_sessions: max_sessions.max(1),
        }
    }

    /// Register a session; `None` when the admission limit is reached
    pub fn open(&self, instance_id: &str, platform: &str, now: u64) -> Option<SessionId> {
        let mut sessions = self.sessions.lock();
        if sessions.len() >= self.max_sessions {
            return None;
        }
        let session = ConnectionSession::new(instance_id.to_string(), platform.to_string(), now);
        let id = session.session_id;
        sessions.insert(id, session);
        Some(id)
    }

    /// Remove a session and every Injection keyed to it
    ///
    /// Returns the removed session on the first call and `None` afterwards, so
    /// concurrent failure paths can all call it safely.
    pub fn teardown(&self, session_id: SessionId) -> Option<ConnectionSession> {
        let removed = self.sessions.lock().remove(&session_id);
        match &removed {
            Some(session) => info!(
                session = %session_id,
                instance = %session.instance_id,
                injections = session.injections.len(),
                "Session torn down"
            ),
            None => debug!(session = %session_id, "Session already torn down"),
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.max_sessions
    }

    pub fn contains(&self, session_id: SessionId) -> bool {
        self.sessions.lock().contains_key(&session_id)
    }

    pub fn get(&self, session_id: SessionId) -> Option<ConnectionSession> {
        self.sessions.lock().get(&session_id).cloned()
    }

    /// Injections tracked across all sessions
    pub fn injection_count(&self) -> usize {
        self.sessions
            .lock()
            .values()
            .map(|s| s.injections.len())
            .sum()
    }

    pub fn summaries(&self) -> Vec<SessionSummary> {
        let mut summaries: Vec<_> = self
            .sessions
            .lock()
            .values()
            .map(ConnectionSession::summary)
            .collect();
        summaries.sort_by_key(|s| s.connected_at);
        summaries
    }

    pub fn touch(&self, session_id: SessionId, now: u64) {
        self.update(session_id, |s| s.last_activity = s.last_activity.max(now));
    }

    pub fn set_backend_connected(&self, session_id: SessionId, connected: bool) {
        self.update(session_id, |s| s.backend_connected = connected);
    }

    /// Remember the newest state seen for a session and its instance
    pub fn record_state(&self, session_id: SessionId, state: StateSnapshot) {
        {
            let mut sessions = self.sessions.lock();
            let Some(session) = sessions.get_mut(&session_id) else {
                return;
            };
            if supersedes(&state, session.latest_state.as_ref()) {
                session.latest_state = Some(state.clone());
            }
        }
        self.hold_state(state);
    }

    /// Remember the newest state seen for the snapshot's instance
    pub fn hold_state(&self, state: StateSnapshot) {
        let mut held = self.held.lock();
        let current = held.get(state.instance_id());
        if supersedes(&state, current) {
            held.insert(state.instance_id().to_string(), state);
        }
    }

    pub fn record_experience(&self, session_id: SessionId) {
        self.update(session_id, |s| s.experiences += 1);
    }

    pub fn latest_state(&self, session_id: SessionId) -> Option<StateSnapshot> {
        self.sessions
            .lock()
            .get(&session_id)
            .and_then(|s| s.latest_state.clone())
    }

    /// Newest state seen for `instance_id`, from any session or HTTP request
    pub fn latest_for_instance(&self, instance_id: &str) -> Option<StateSnapshot> {
        self.held.lock().get(instance_id).cloned()
    }

    /// Insert or replace an Injection; `false` if its session is gone
    pub fn upsert_injection(&self, injection: Injection) -> bool {
        let mut sessions = self.sessions.lock();
        match sessions.get_mut(&injection.session_id) {
            Some(session) => {
                session.injections.insert(injection.injection_id, injection);
                true
            }
            None => false,
        }
    }

    pub fn injections(&self, session_id: SessionId) -> Vec<Injection> {
        self.sessions
            .lock()
            .get(&session_id)
            .map(|s| s.injections.values().cloned().collect())
            .unwrap_or_default()
    }

    fn update(&self, session_id: SessionId, f: impl FnOnce(&mut ConnectionSession)) {
        if let Some(session) = self.sessions.lock().get_mut(&session_id) {
            f(session);
        }
    }
}

fn supersedes(candidate: &StateSnapshot, current: Option<&StateSnapshot>) -> bool {
    current.map_or(true, |current| candidate.updated_at() >= current.updated_at())
}

/// Tears its session down when dropped
///
/// Held by the connection handler so a panic or an aborted task still cleans up.
#[derive(Debug)]
pub struct SessionGuard {
    table: Arc<SessionTable>,
    session_id: SessionId,
}

impl SessionGuard {
    pub fn new(table: Arc<SessionTable>, session_id: SessionId) -> Self {
        Self { table, session_id }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Tear down now; the later drop is then a no-op
    pub fn teardown(&self) -> Option<ConnectionSession> {
        self.table.teardown(self.session_id)
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.table.teardown(self.session_id);
    }
}
