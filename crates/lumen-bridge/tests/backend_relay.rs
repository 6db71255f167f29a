//! Sessions paired with a backend leg

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use assert_matches::assert_matches;
use common::{eventually, start, TestClient, RECV_TIMEOUT};
use lumen_bridge::{BackendLeg, BridgeConfig, BridgeServer, LegHeartbeat, SessionTable};
use lumen_core::protocol::{
    ExperienceAck, ExperiencePayload, StateResponsePayload, StateSyncPayload,
};
use lumen_core::{EvolutionEngine, ExperienceInput, Message, SessionId};
use lumen_sync::SyncTransport;
use lumen_testkit::{bridge_config, channel_backend, snapshot, MemoryTransport, ServerEnd};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use url::Url;

async fn connected_pair(instance_id: &str) -> (TestClient, ServerEnd, Arc<SessionTable>) {
    connected_pair_with(bridge_config(), instance_id).await
}

async fn connected_pair_with(
    config: BridgeConfig,
    instance_id: &str,
) -> (TestClient, ServerEnd, Arc<SessionTable>) {
    let (backend, transport) = channel_backend();
    let server = BridgeServer::with_backend(config, backend).unwrap();
    let (addr, sessions) = start(server).await;

    let mut client = TestClient::connect(addr, instance_id, "web").await;
    let connected = assert_matches!(client.recv().await, Message::Connected(c) => c);
    assert!(connected.backend_available);
    assert!(sessions.get(connected.session_id).unwrap().backend_connected);

    let leg = transport.accept_within(RECV_TIMEOUT).await.unwrap();
    (client, leg, sessions)
}

#[tokio::test(flavor = "multi_thread")]
async fn leg_targets_instance_url() {
    let (_client, leg, _) = connected_pair("tab-9").await;
    assert_eq!(
        leg.url().as_str(),
        "ws://backend.test/sync/tab-9?platform=web"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn requests_are_forwarded_and_replies_relayed() {
    let (mut client, mut leg, sessions) = connected_pair("tab-10").await;

    client.send(&Message::GetState).await;
    assert_eq!(leg.recv_non_heartbeat().await, Some(Message::GetState));

    let authoritative = snapshot("tab-10", 0.72, 5_000);
    assert!(leg.send(&Message::StateSync(StateSyncPayload {
        state: authoritative.clone(),
        degraded: false,
    })));
    let sync = assert_matches!(client.recv().await, Message::StateSync(s) => s);
    assert!(!sync.degraded);
    assert_eq!(sync.state, authoritative);

    let recorded = sessions
        .summaries()
        .into_iter()
        .find(|s| s.instance_id == "tab-10")
        .unwrap();
    assert_eq!(recorded.latest_state.as_ref(), Some(&authoritative));
}

#[tokio::test(flavor = "multi_thread")]
async fn experiences_go_to_the_backend() {
    let (mut client, mut leg, _) = connected_pair("tab-11").await;

    let engine = EvolutionEngine::default();
    let state = engine.initial_state("tab-11", 0.3, 10);
    let experience = engine.record(&state, ExperienceInput::new("relayed"), 20);
    client
        .send(&Message::Experience(ExperiencePayload::from_experience(
            &experience,
            "web",
        )))
        .await;

    let forwarded = assert_matches!(
        leg.recv_non_heartbeat().await,
        Some(Message::Experience(p)) => p
    );
    assert_eq!(forwarded.id, experience.id());

    // The ack comes from the backend, not the bridge
    assert!(leg.send(&Message::ExperienceAck(ExperienceAck { id: forwarded.id })));
    let ack = assert_matches!(client.recv().await, Message::ExperienceAck(a) => a);
    assert_eq!(ack.id, experience.id());
}

#[tokio::test(flavor = "multi_thread")]
async fn backend_pings_are_not_relayed() {
    let (mut client, mut leg, _) = connected_pair("tab-12").await;

    assert!(leg.send(&Message::Ping));
    assert_eq!(leg.recv_message().await, Some(Message::Pong));

    assert!(leg.send(&Message::Pong));
    client.send(&Message::Ping).await;
    assert_matches!(client.recv().await, Message::Pong);
}

#[tokio::test(flavor = "multi_thread")]
async fn lost_backend_switches_session_to_fallback() {
    let (mut client, mut leg, sessions) = connected_pair("tab-13").await;

    let authoritative = snapshot("tab-13", 0.66, 7_000);
    assert!(leg.send(&Message::StateSync(StateSyncPayload {
        state: authoritative.clone(),
        degraded: false,
    })));
    assert_matches!(client.recv().await, Message::StateSync(_));

    leg.close();
    let status = assert_matches!(client.recv().await, Message::Status(s) => s);
    assert!(!status.backend_available);
    eventually(|| sessions.summaries().iter().all(|s| !s.backend_connected)).await;

    client.send(&Message::GetState).await;
    let response = assert_matches!(client.recv().await, Message::StateResponse(r) => r);
    assert!(response.degraded);
    assert_eq!(response.state, Some(authoritative));
}

#[tokio::test(flavor = "multi_thread")]
async fn client_disconnect_closes_the_leg() {
    let (client, mut leg, sessions) = connected_pair("tab-14").await;

    client.close().await;
    eventually(|| sessions.is_empty()).await;
    let closed = tokio::time::timeout(RECV_TIMEOUT, leg.recv()).await.unwrap();
    assert_eq!(closed, None);
}

#[tokio::test]
async fn requests_queued_for_a_dead_leg_are_handed_back() {
    let transport = MemoryTransport::new();
    let url = Url::parse("ws://backend.test/sync/tab-15?platform=web").unwrap();
    let connection = transport.connect(&url).await.unwrap();
    let mut backend_end = transport.accept().await;
    backend_end.close();

    let (to_client, _client_rx) = mpsc::unbounded_channel();
    let mut leg = BackendLeg::spawn(
        SessionId::new(),
        connection,
        to_client,
        Arc::new(SessionTable::new(4)),
        LegHeartbeat::from_config(&bridge_config()),
    );
    leg.forward(Message::GetState).unwrap();

    let closed = leg.closed().await;
    assert_eq!(closed.reason, "backend closed the connection");
    assert_eq!(closed.unanswered, vec![Message::GetState]);
}

#[tokio::test(flavor = "multi_thread")]
async fn silent_backend_times_out_and_pending_request_is_answered_locally() {
    let config = BridgeConfig {
        backend_heartbeat_interval: Duration::from_millis(50),
        backend_pong_timeout: Duration::from_millis(100),
        ..bridge_config()
    };
    let (mut client, mut leg, sessions) = connected_pair_with(config, "tab-16").await;

    client.send(&Message::GetState).await;
    assert_eq!(leg.recv_non_heartbeat().await, Some(Message::GetState));

    // The backend keeps the socket open but never answers, pings included.
    let status = assert_matches!(client.recv().await, Message::Status(s) => s);
    assert!(!status.backend_available);
    assert!(status.message.contains("heartbeat timeout"));

    let response = assert_matches!(client.recv().await, Message::StateResponse(r) => r);
    assert!(response.degraded);
    assert_eq!(response.state.unwrap().instance_id(), "tab-16");
    eventually(|| sessions.summaries().iter().all(|s| !s.backend_connected)).await;
    assert!(!leg.is_open());
}

#[tokio::test(flavor = "multi_thread")]
async fn answered_requests_are_not_replayed_after_loss() {
    let (mut client, mut leg, _) = connected_pair("tab-17").await;

    client.send(&Message::GetState).await;
    assert_eq!(leg.recv_non_heartbeat().await, Some(Message::GetState));
    assert!(leg.send(&Message::StateResponse(StateResponsePayload {
        state: Some(snapshot("tab-17", 0.4, 9_000)),
        degraded: false,
    })));
    let response = assert_matches!(client.recv().await, Message::StateResponse(r) => r);
    assert!(!response.degraded);

    leg.close();
    assert_matches!(client.recv().await, Message::Status(s) if !s.backend_available);

    client.send(&Message::Ping).await;
    assert_matches!(client.recv().await, Message::Pong);
}
