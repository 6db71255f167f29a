//! Common fixtures

use lumen_bridge::BridgeConfig;
use lumen_core::{EvolutionEngine, ExperienceInput, StateSnapshot};
use lumen_sync::SyncClientConfig;
use std::time::Duration;

/// Endpoint used with [`MemoryTransport`](crate::MemoryTransport)
pub const MEMORY_ENDPOINT: &str = "ws://bridge.test/ws";

/// Client config pointed at the in-memory endpoint, with no drain pacing
pub fn client_config(instance_id: &str) -> SyncClientConfig {
    let mut config = SyncClientConfig::new(instance_id, Some(MEMORY_ENDPOINT.to_string()));
    config.platform = "test".to_string();
    config.drain_pacing = Duration::ZERO;
    config
}

/// Client config with no endpoint
pub fn standalone_config(instance_id: &str) -> SyncClientConfig {
    SyncClientConfig::new(instance_id, None)
}

/// Bridge config with fast injections, bound to an ephemeral port
pub fn bridge_config() -> BridgeConfig {
    BridgeConfig {
        bind_address: "127.0.0.1:0".to_string(),
        injection_step: Duration::from_millis(10),
        ..Default::default()
    }
}

/// Experience with `keys` context entries
pub fn experience_with_context(content: &str, keys: usize) -> ExperienceInput {
    (0..keys).fold(ExperienceInput::new(content), |input, i| {
        input.with_context(format!("k{i}"), format!("v{i}"))
    })
}

/// Snapshot built with the default engine
pub fn snapshot(instance_id: &str, score: f64, updated_at: u64) -> StateSnapshot {
    EvolutionEngine::default().initial_state(instance_id, score, updated_at)
}
