//! State Evolution Engine
//!
//! `evolve(state, experience) -> state` is a pure function. Two bounded deltas are
//! derived from the Experience:
//!
//! - a content delta, from the character count of `content` normalized by
//!   `content_norm` and capped at `max_content_delta`, plus a signed outcome term
//!   from the mean of the `outcome` signals scaled by `outcome_weight`; added to `score`
//! - a context delta, from the number of `context` keys normalized by `context_norm`
//!   and capped at `max_context_delta`; added to `aux_score`
//!
//! Both scores are clamped to `[0,1]` and the phase is recomputed from `score`.
//! The engine never reads a clock: `updated_at` comes from the Experience.

use serde::{Deserialize, Serialize};

use crate::errors::{LumenError, Result};
use crate::types::{
    clamp_unit, Experience, ExperienceId, ExperienceInput, PhaseTable, StateSnapshot,
};

/// Tuning constants for the engine
///
/// The defaults are placeholders; only boundedness and phase monotonicity are
/// contractual.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvolutionConfig {
    /// Characters of content that saturate the content delta
    pub content_norm: f64,
    /// Upper bound of the content delta
    pub max_content_delta: f64,
    /// Context keys that saturate the context delta
    pub context_norm: f64,
    /// Upper bound of the context delta
    pub max_context_delta: f64,
    /// Weight of the mean outcome signal (signed)
    pub outcome_weight: f64,
    /// Both scores at or above this value raise the integration flag
    pub integration_threshold: f64,
    /// Score to phase mapping
    pub phases: PhaseTable,
}

impl Default for EvolutionConfig {
    fn default() -> Self {
        Self {
            content_norm: 500.0,
            max_content_delta: 0.05,
            context_norm: 10.0,
            max_context_delta: 0.05,
            outcome_weight: 0.02,
            integration_threshold: 0.6,
            phases: PhaseTable::default(),
        }
    }
}

impl EvolutionConfig {
    /// Validate configuration settings
    pub fn validate(&self) -> Result<()> {
        if !(self.content_norm > 0.0) || !(self.context_norm > 0.0) {
            return Err(LumenError::config("evolution norms must be positive"));
        }
        for (name, value) in [
            ("max_content_delta", self.max_content_delta),
            ("max_context_delta", self.max_context_delta),
            ("outcome_weight", self.outcome_weight),
            ("integration_threshold", self.integration_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(LumenError::config(format!("{name} must lie within [0,1]")));
            }
        }
        self.phases.validate()
    }
}

/// Pure state evolution with a fixed configuration
#[derive(Debug, Clone, Default)]
pub struct EvolutionEngine {
    config: EvolutionConfig,
}

impl EvolutionEngine {
    /// Create an engine, validating its constants
    pub fn new(config: EvolutionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &EvolutionConfig {
        &self.config
    }

    /// Starting snapshot for an instance
    pub fn initial_state(
        &self,
        instance_id: impl Into<String>,
        score: f64,
        now: u64,
    ) -> StateSnapshot {
        self.snapshot(instance_id, score, 0.0, now)
    }

    /// Snapshot consistent with this engine's phase table and integration rule
    pub fn snapshot(
        &self,
        instance_id: impl Into<String>,
        score: f64,
        aux_score: f64,
        updated_at: u64,
    ) -> StateSnapshot {
        let score = clamp_unit(score);
        let aux_score = clamp_unit(aux_score);
        let threshold = self.config.integration_threshold;
        StateSnapshot::new(
            instance_id,
            score,
            aux_score,
            score >= threshold && aux_score >= threshold,
            &self.config.phases,
            updated_at,
        )
    }

    /// Apply one Experience to a state
    pub fn evolve(&self, state: &StateSnapshot, experience: &Experience) -> StateSnapshot {
        self.apply(
            state,
            experience.content(),
            experience.context().len(),
            experience.outcome().values().copied(),
            experience.created_at(),
        )
    }

    /// Build an immutable Experience from raw input, running the engine once
    pub fn record(
        &self,
        state: &StateSnapshot,
        input: ExperienceInput,
        created_at: u64,
    ) -> Experience {
        let after = self.apply(
            state,
            &input.content,
            input.context.len(),
            input.outcome.values().copied(),
            created_at,
        );
        Experience::new(ExperienceId::new(), input, state.clone(), after, created_at)
    }

    /// Content delta for a piece of content, in `[0, max_content_delta]`
    pub fn content_delta(&self, content: &str) -> f64 {
        let chars = content.chars().count() as f64;
        (chars / self.config.content_norm).min(1.0) * self.config.max_content_delta
    }

    /// Context delta for a key count, in `[0, max_context_delta]`
    pub fn context_delta(&self, keys: usize) -> f64 {
        (keys as f64 / self.config.context_norm).min(1.0) * self.config.max_context_delta
    }

    fn outcome_delta(&self, outcome: impl Iterator<Item = f64>) -> f64 {
        let (sum, count) = outcome
            .filter(|v| v.is_finite())
            .fold((0.0, 0usize), |(sum, count), v| (sum + v.clamp(-1.0, 1.0), count + 1));
        if count == 0 {
            return 0.0;
        }
        (sum / count as f64) * self.config.outcome_weight
    }

    fn apply(
        &self,
        state: &StateSnapshot,
        content: &str,
        context_keys: usize,
        outcome: impl Iterator<Item = f64>,
        created_at: u64,
    ) -> StateSnapshot {
        let score = state.score() + self.content_delta(content) + self.outcome_delta(outcome);
        let aux_score = state.aux_score() + self.context_delta(context_keys);
        self.snapshot(
            state.instance_id(),
            score,
            aux_score,
            state.updated_at().max(created_at),
        )
    }
}

/// Evolve with the default constants
pub fn evolve(state: &StateSnapshot, experience: &Experience) -> StateSnapshot {
    EvolutionEngine::default().evolve(state, experience)
}
