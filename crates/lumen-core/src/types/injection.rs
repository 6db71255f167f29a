//! Trackable units of simulated work tied to a bridge session
//!
//! Status moves exactly once along `Pending -> Active -> {Completed | Failed}`.
//! Any other transition is rejected and leaves the record untouched.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::{InjectionId, SessionId};
use crate::errors::{LumenError, Result};

/// What the injection asks the target process to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InjectionKind {
    /// Raise the target's activity
    Amplify,
    /// Lower the target's activity
    Dampen,
    /// Hold the target steady
    Stabilize,
    /// Observe without changing anything
    Observe,
}

/// Lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InjectionStatus {
    Pending,
    Active,
    Completed,
    Failed,
}

impl InjectionStatus {
    /// Completed or Failed
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for InjectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// One tracked injection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Injection {
    pub injection_id: InjectionId,
    pub session_id: SessionId,
    pub target_process: String,
    pub kind: InjectionKind,
    pub requested_level: f64,
    status: InjectionStatus,
    pub created_at: u64,
    updated_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    failure: Option<String>,
}

impl Injection {
    /// New injection in `Pending`
    pub fn pending(
        session_id: SessionId,
        target_process: impl Into<String>,
        kind: InjectionKind,
        requested_level: f64,
        now: u64,
    ) -> Self {
        Self {
            injection_id: InjectionId::new(),
            session_id,
            target_process: target_process.into(),
            kind,
            requested_level,
            status: InjectionStatus::Pending,
            created_at: now,
            updated_at: now,
            failure: None,
        }
    }

    pub fn status(&self) -> InjectionStatus {
        self.status
    }

    pub fn updated_at(&self) -> u64 {
        self.updated_at
    }

    /// Reason recorded on failure
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    /// `Pending -> Active`
    pub fn activate(&mut self, now: u64) -> Result<()> {
        self.transition(InjectionStatus::Pending, InjectionStatus::Active, now)
    }

    /// `Active -> Completed`
    pub fn complete(&mut self, now: u64) -> Result<()> {
        self.transition(InjectionStatus::Active, InjectionStatus::Completed, now)
    }

    /// `Active -> Failed`
    pub fn fail(&mut self, reason: impl Into<String>, now: u64) -> Result<()> {
        self.transition(InjectionStatus::Active, InjectionStatus::Failed, now)?;
        self.failure = Some(reason.into());
        Ok(())
    }

    fn transition(
        &mut self,
        from: InjectionStatus,
        to: InjectionStatus,
        now: u64,
    ) -> Result<()> {
        if self.status != from {
            return Err(LumenError::invalid(format!(
                "injection {} cannot move {} -> {}",
                self.injection_id, self.status, to
            )));
        }
        self.status = to;
        self.updated_at = now;
        Ok(())
    }
}
