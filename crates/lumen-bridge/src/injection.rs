//! Injection lifecycle
//!
//! `Pending -> Active -> Completed | Failed`. Each request runs as its own task
//! and reports every transition to the client through the session's writer.

use lumen_core::protocol::InjectionRequestPayload;
use lumen_core::time::now_millis;
use lumen_core::{Injection, Message, Result, SessionId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::session::SessionTable;

/// Why a request cannot complete, if it cannot
pub fn rejection_reason(request: &InjectionRequestPayload) -> Option<String> {
    if request.target_process.trim().is_empty() {
        return Some("target_process must not be empty".to_string());
    }
    if !(0.0..=1.0).contains(&request.requested_level) {
        return Some(format!(
            "requested_level {} outside [0, 1]",
            request.requested_level
        ));
    }
    None
}

/// Drives one Injection through its lifecycle
#[derive(Debug, Clone)]
pub struct InjectionRunner {
    sessions: Arc<SessionTable>,
    outbound: mpsc::UnboundedSender<Message>,
    step: Duration,
}

impl InjectionRunner {
    pub fn new(
        sessions: Arc<SessionTable>,
        outbound: mpsc::UnboundedSender<Message>,
        step: Duration,
    ) -> Self {
        Self {
            sessions,
            outbound,
            step,
        }
    }

    /// Run a request to its terminal status
    ///
    /// Returns the final record, or `None` if the session went away first; in
    /// that case the Injection was discarded together with the session.
    pub async fn run(
        &self,
        session_id: SessionId,
        request: InjectionRequestPayload,
    ) -> Result<Option<Injection>> {
        let mut injection = Injection::pending(
            session_id,
            request.target_process.clone(),
            request.kind,
            request.requested_level,
            now_millis(),
        );
        info!(
            session = %session_id,
            injection = %injection.injection_id,
            target = %injection.target_process,
            kind = ?injection.kind,
            "Injection requested"
        );
        if !self.publish(&injection) {
            return Ok(None);
        }

        tokio::time::sleep(self.step).await;
        injection.activate(now_millis())?;
        if !self.publish(&injection) {
            return Ok(None);
        }

        tokio::time::sleep(self.step).await;
        match rejection_reason(&request) {
            Some(reason) => injection.fail(reason, now_millis())?,
            None => injection.complete(now_millis())?,
        }
        if !self.publish(&injection) {
            return Ok(None);
        }

        info!(
            injection = %injection.injection_id,
            status = %injection.status(),
            "Injection finished"
        );
        Ok(Some(injection))
    }

    fn publish(&self, injection: &Injection) -> bool {
        if !self.sessions.upsert_injection(injection.clone()) {
            debug!(
                injection = %injection.injection_id,
                "Session closed, abandoning injection"
            );
            return false;
        }
        // A closed writer means the handler is shutting down; the table entry
        // disappears with the session.
        let _ = self
            .outbound
            .send(Message::InjectionResult(injection.clone()));
        true
    }
}
