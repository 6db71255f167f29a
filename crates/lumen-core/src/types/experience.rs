//! Discrete input events that perturb the state

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::ids::ExperienceId;
use super::snapshot::StateSnapshot;

/// Caller-supplied part of an Experience, before the engine has run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExperienceInput {
    /// Free-form content
    pub content: String,
    /// String context attributes
    #[serde(default)]
    pub context: BTreeMap<String, String>,
    /// Named outcome signals, each expected in `[-1,1]`
    #[serde(default)]
    pub outcome: BTreeMap<String, f64>,
}

impl ExperienceInput {
    /// Input with content only
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    /// Add a context attribute
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Add an outcome signal
    pub fn with_outcome(mut self, key: impl Into<String>, value: f64) -> Self {
        self.outcome.insert(key.into(), value);
        self
    }
}

/// One recorded input event with the state before and after it was applied
///
/// Immutable once created; built by [`EvolutionEngine::record`](crate::EvolutionEngine::record).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experience {
    id: ExperienceId,
    content: String,
    context: BTreeMap<String, String>,
    state_before: StateSnapshot,
    state_after: StateSnapshot,
    outcome: BTreeMap<String, f64>,
    created_at: u64,
    origin_instance: String,
}

impl Experience {
    pub(crate) fn new(
        id: ExperienceId,
        input: ExperienceInput,
        state_before: StateSnapshot,
        state_after: StateSnapshot,
        created_at: u64,
    ) -> Self {
        let origin_instance = state_before.instance_id().to_string();
        Self {
            id,
            content: input.content,
            context: input.context,
            state_before,
            state_after,
            outcome: input.outcome,
            created_at,
            origin_instance,
        }
    }

    pub fn id(&self) -> ExperienceId {
        self.id
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn context(&self) -> &BTreeMap<String, String> {
        &self.context
    }

    pub fn outcome(&self) -> &BTreeMap<String, f64> {
        &self.outcome
    }

    pub fn state_before(&self) -> &StateSnapshot {
        &self.state_before
    }

    pub fn state_after(&self) -> &StateSnapshot {
        &self.state_after
    }

    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    pub fn origin_instance(&self) -> &str {
        &self.origin_instance
    }
}
