//! Evolution engine properties
//!
//! The engine replaces the old jittered update with a deterministic formula, so
//! identical inputs must produce identical snapshots. Scores stay in `[0,1]` for any
//! sequence of Experiences and phase never decreases as score increases.

use lumen_core::{EvolutionEngine, ExperienceInput, PhaseTable, StateSnapshot};
use proptest::prelude::*;

fn arbitrary_input() -> impl Strategy<Value = ExperienceInput> {
    (
        ".{0,800}",
        prop::collection::btree_map("[a-z]{1,6}", "[a-z]{0,6}", 0..16),
        prop::collection::btree_map("[a-z]{1,6}", -3.0f64..3.0, 0..4),
    )
        .prop_map(|(content, context, outcome)| ExperienceInput {
            content,
            context,
            outcome,
        })
}

proptest! {
    #[test]
    fn prop_evolve_is_deterministic(
        score in 0.0f64..=1.0,
        aux in 0.0f64..=1.0,
        input in arbitrary_input(),
    ) {
        let engine = EvolutionEngine::default();
        let state = engine.snapshot("web-1", score, aux, 0);
        let exp = engine.record(&state, input, 42);

        let first = engine.evolve(&state, &exp);
        let second = engine.evolve(&state, &exp);
        prop_assert_eq!(&first, &second);
        prop_assert_eq!(&first, exp.state_after());
    }

    #[test]
    fn prop_scores_stay_bounded(
        start in -1.0f64..2.0,
        inputs in prop::collection::vec(arbitrary_input(), 1..60),
    ) {
        let engine = EvolutionEngine::default();
        let mut state = engine.initial_state("web-1", start, 0);

        for (i, input) in inputs.into_iter().enumerate() {
            let exp = engine.record(&state, input, i as u64);
            state = engine.evolve(&state, &exp);
            prop_assert!((0.0..=1.0).contains(&state.score()));
            prop_assert!((0.0..=1.0).contains(&state.aux_score()));
            prop_assert_eq!(state.phase(), engine.config().phases.phase_for(state.score()));
        }
    }

    #[test]
    fn prop_phase_is_monotonic_in_score(a in 0.0f64..=1.0, b in 0.0f64..=1.0) {
        let table = PhaseTable::default();
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(table.phase_for(high) >= table.phase_for(low));
    }

    #[test]
    fn prop_snapshot_phase_tracks_score(score in -5.0f64..5.0) {
        let table = PhaseTable::default();
        let snapshot = StateSnapshot::new("a", score, 0.0, false, &table, 0);
        prop_assert_eq!(snapshot.phase(), table.phase_for(snapshot.score()));
    }
}

#[test]
fn crossing_a_boundary_advances_phase() {
    let engine = EvolutionEngine::default();
    let state = engine.initial_state("web-1", 0.44, 0);
    let before = state.phase();

    let exp = engine.record(&state, ExperienceInput::new("x".repeat(500)), 1);
    let after = engine.evolve(&state, &exp);

    assert!(after.score() >= 0.45);
    assert!(after.phase() > before);
}
