//! Locally synthesized responses
//!
//! Used whenever no backend leg is available. Every answer is derived from the
//! newest state the bridge holds for the instance and is tagged `degraded`.

use lumen_core::protocol::{
    ExperiencePayload, QueryPayload, QueryResponsePayload, StateResponsePayload, StateSyncPayload,
};
use lumen_core::time::now_millis;
use lumen_core::{EvolutionEngine, ExperienceInput, StateSnapshot};
use serde_json::{json, Value};

/// Score assumed for an instance the bridge has never seen
pub const UNKNOWN_INSTANCE_SCORE: f64 = 0.5;

/// Queries answerable without a backend
pub const SUPPORTED_QUERIES: [&str; 3] = ["state", "phase", "phases"];

/// Fallback synthesizer
#[derive(Debug, Clone, Default)]
pub struct Fallback {
    engine: EvolutionEngine,
}

impl Fallback {
    pub fn new(engine: EvolutionEngine) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &EvolutionEngine {
        &self.engine
    }

    /// Held state, or a fresh one for an unknown instance
    pub fn current_state(&self, instance_id: &str, latest: Option<StateSnapshot>) -> StateSnapshot {
        match latest {
            Some(state) if state.instance_id() == instance_id => {
                state.normalized(&self.engine.config().phases)
            }
            _ => self
                .engine
                .initial_state(instance_id, UNKNOWN_INSTANCE_SCORE, now_millis()),
        }
    }

    /// State after applying a client Experience
    ///
    /// A client reports its own post-Experience state; that is taken as-is when it
    /// belongs to the instance. Otherwise the Experience is evolved from the held
    /// state.
    pub fn apply_experience(
        &self,
        instance_id: &str,
        latest: Option<StateSnapshot>,
        experience: &ExperiencePayload,
    ) -> StateSnapshot {
        if let Some(reported) = &experience.state {
            if reported.instance_id() == instance_id {
                return reported.clone().normalized(&self.engine.config().phases);
            }
        }

        let current = self.current_state(instance_id, latest);
        let input = ExperienceInput {
            content: experience.content.clone(),
            context: experience.context.clone(),
            outcome: experience.outcome.clone(),
        };
        let created_at = if experience.timestamp == 0 {
            now_millis()
        } else {
            experience.timestamp
        };
        self.engine
            .record(&current, input, created_at)
            .state_after()
            .clone()
    }

    pub fn state_sync(&self, state: StateSnapshot) -> StateSyncPayload {
        StateSyncPayload {
            state,
            degraded: true,
        }
    }

    pub fn state_response(
        &self,
        instance_id: &str,
        latest: Option<StateSnapshot>,
    ) -> StateResponsePayload {
        StateResponsePayload {
            state: Some(self.current_state(instance_id, latest)),
            degraded: true,
        }
    }

    pub fn query_response(
        &self,
        instance_id: &str,
        latest: Option<StateSnapshot>,
        query: &QueryPayload,
    ) -> QueryResponsePayload {
        let state = self.current_state(instance_id, latest);
        let answer = match query.query.trim() {
            "state" => json!({
                "score": state.score(),
                "aux_score": state.aux_score(),
                "integration_flag": state.integration_flag(),
                "phase": state.phase(),
                "updated_at": state.updated_at(),
            }),
            "phase" => json!({ "phase": state.phase(), "score": state.score() }),
            "phases" => self.phase_table(),
            other => json!({
                "error": format!("query '{other}' needs the backend"),
                "supported": SUPPORTED_QUERIES,
            }),
        };
        QueryResponsePayload {
            query: query.query.clone(),
            answer,
            degraded: true,
        }
    }

    fn phase_table(&self) -> Value {
        let phases = &self.engine.config().phases;
        let bands: Vec<Value> = lumen_core::Phase::ALL
            .iter()
            .zip(phases.lower_bounds())
            .map(|(phase, lower)| json!({ "phase": phase, "lower_bound": lower }))
            .collect();
        Value::Array(bands)
    }
}
