//! Ordering properties of the Experience Buffer

#![allow(clippy::unwrap_used)]

use async_trait::async_trait;
use lumen_core::{EvolutionEngine, Experience, ExperienceId, ExperienceInput, LumenError, Result};
use lumen_sync::{ExperienceBuffer, ExperienceSink};
use proptest::prelude::*;
use std::time::Duration;

/// Records delivered ids, failing once when `fail_at` deliveries have been made
struct Recorder {
    delivered: Vec<ExperienceId>,
    fail_at: Option<usize>,
}

#[async_trait]
impl ExperienceSink for Recorder {
    async fn deliver(&mut self, experience: &Experience) -> Result<()> {
        if self.fail_at == Some(self.delivered.len()) {
            self.fail_at = None;
            return Err(LumenError::transport("reset"));
        }
        self.delivered.push(experience.id());
        Ok(())
    }
}

fn experiences(contents: &[String]) -> Vec<Experience> {
    let engine = EvolutionEngine::default();
    let mut state = engine.initial_state("prop", 0.5, 0);
    contents
        .iter()
        .enumerate()
        .map(|(i, content)| {
            let exp = engine.record(&state, ExperienceInput::new(content.clone()), i as u64);
            state = exp.state_after().clone();
            exp
        })
        .collect()
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap()
}

proptest! {
    #[test]
    fn drain_delivers_in_push_order(contents in prop::collection::vec("[a-z]{0,12}", 0..20)) {
        let items = experiences(&contents);
        let buffer = ExperienceBuffer::new(64);
        for item in &items {
            buffer.push(item.clone());
        }

        let mut sink = Recorder { delivered: Vec::new(), fail_at: None };
        let report = runtime().block_on(buffer.drain(&mut sink, Duration::ZERO));

        prop_assert!(report.is_complete());
        prop_assert_eq!(sink.delivered, items.iter().map(Experience::id).collect::<Vec<_>>());
        prop_assert!(buffer.is_empty());
    }

    #[test]
    fn failed_drain_resumes_where_it_stopped(
        contents in prop::collection::vec("[a-z]{1,8}", 1..20),
        fail_seed in any::<usize>(),
    ) {
        let items = experiences(&contents);
        let fail_at = fail_seed % items.len();
        let buffer = ExperienceBuffer::new(64);
        for item in &items {
            buffer.push(item.clone());
        }

        let rt = runtime();
        let mut sink = Recorder { delivered: Vec::new(), fail_at: Some(fail_at) };
        let first = rt.block_on(buffer.drain(&mut sink, Duration::ZERO));
        prop_assert_eq!(first.delivered, fail_at);
        prop_assert_eq!(buffer.len(), items.len() - fail_at);

        let second = rt.block_on(buffer.drain(&mut sink, Duration::ZERO));
        prop_assert!(second.is_complete());
        prop_assert_eq!(sink.delivered, items.iter().map(Experience::id).collect::<Vec<_>>());
    }

    #[test]
    fn overflow_keeps_newest_in_order(count in 1usize..40, capacity in 1usize..10) {
        let contents: Vec<String> = (0..count).map(|i| format!("e{i}")).collect();
        let items = experiences(&contents);
        let buffer = ExperienceBuffer::new(capacity);
        for item in &items {
            buffer.push(item.clone());
        }

        let kept: Vec<_> = buffer.snapshot().iter().map(Experience::id).collect();
        let expected: Vec<_> = items
            .iter()
            .skip(count.saturating_sub(capacity))
            .map(Experience::id)
            .collect();
        prop_assert_eq!(kept, expected);
        prop_assert_eq!(buffer.dropped(), count.saturating_sub(capacity) as u64);
    }
}
