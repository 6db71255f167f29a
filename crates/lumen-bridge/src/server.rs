//! Bridge server
//!
//! Axum router exposing the WebSocket endpoint plus a small HTTP surface for
//! health checks, introspection and the request/response fallback.

use axum::{
    extract::{ws::WebSocketUpgrade, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use lumen_core::time::now_millis;
use lumen_core::{EvolutionEngine, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::backend::Backend;
use crate::config::BridgeConfig;
use crate::fallback::Fallback;
use crate::http;
use crate::session::SessionTable;
use crate::websocket::handle_connection;

/// Shared state for Axum handlers
#[derive(Debug, Clone)]
pub struct BridgeState {
    pub config: Arc<BridgeConfig>,
    pub sessions: Arc<SessionTable>,
    pub backend: Arc<Backend>,
    pub fallback: Arc<Fallback>,
    pub started_at: u64,
}

/// Session multiplexer
#[derive(Debug)]
pub struct BridgeServer {
    state: BridgeState,
}

impl BridgeServer {
    /// Server with a WebSocket backend taken from `config`
    pub fn new(config: BridgeConfig) -> Result<Self> {
        let backend = Backend::from_config(&config)?;
        Self::with_backend(config, backend)
    }

    /// Server with an explicit backend
    pub fn with_backend(config: BridgeConfig, backend: Backend) -> Result<Self> {
        config.validate()?;
        let engine = EvolutionEngine::new(config.evolution.clone())?;
        let state = BridgeState {
            sessions: Arc::new(SessionTable::new(config.max_sessions)),
            backend: Arc::new(backend),
            fallback: Arc::new(Fallback::new(engine)),
            config: Arc::new(config),
            started_at: now_millis(),
        };
        Ok(Self { state })
    }

    pub fn state(&self) -> &BridgeState {
        &self.state
    }

    pub fn sessions(&self) -> Arc<SessionTable> {
        self.state.sessions.clone()
    }

    /// Build the router
    pub fn router(&self) -> Router {
        Router::new()
            .route("/ws/:instance_id", get(websocket_handler))
            .route("/health", get(health_check))
            .route("/api/status", get(server_status))
            .route("/api/sessions", get(list_sessions))
            .route("/api/query", post(http::query))
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(CorsLayer::permissive()),
            )
            .with_state(self.state.clone())
    }

    /// Bind `config.bind_address` and serve until the process is stopped
    pub async fn serve(self) -> Result<()> {
        let addr = self.state.config.socket_addr()?;
        let listener = TcpListener::bind(addr).await?;
        self.serve_on(listener).await
    }

    /// Serve on an already bound listener
    pub async fn serve_on(self, listener: TcpListener) -> Result<()> {
        info!(
            addr = %listener.local_addr()?,
            backend = self.state.backend.is_configured(),
            "Starting bridge server"
        );
        axum::serve(listener, self.router()).await?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct ConnectParams {
    #[serde(default = "unknown_platform")]
    platform: String,
}

fn unknown_platform() -> String {
    "unknown".to_string()
}

/// WebSocket connection handler
async fn websocket_handler(
    ws: WebSocketUpgrade,
    Path(instance_id): Path<String>,
    Query(params): Query<ConnectParams>,
    State(state): State<BridgeState>,
) -> Response {
    if instance_id.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, "instance id required").into_response();
    }
    if state.sessions.is_full() {
        warn!(instance = %instance_id, "Refusing upgrade, session limit reached");
        return (StatusCode::SERVICE_UNAVAILABLE, "session limit reached").into_response();
    }
    ws.on_upgrade(move |socket| handle_connection(socket, state, instance_id, params.platform))
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Bridge statistics for monitoring
#[derive(Debug, Serialize, Deserialize)]
pub struct BridgeStatus {
    pub sessions: usize,
    pub max_sessions: usize,
    pub injections: usize,
    pub backend_configured: bool,
    pub capabilities: Vec<String>,
    pub uptime_ms: u64,
}

/// Server status endpoint
async fn server_status(State(state): State<BridgeState>) -> Json<BridgeStatus> {
    Json(BridgeStatus {
        sessions: state.sessions.len(),
        max_sessions: state.config.max_sessions,
        injections: state.sessions.injection_count(),
        backend_configured: state.backend.is_configured(),
        capabilities: state.config.capabilities.clone(),
        uptime_ms: now_millis().saturating_sub(state.started_at),
    })
}

/// Live session summaries
async fn list_sessions(State(state): State<BridgeState>) -> impl IntoResponse {
    Json(state.sessions.summaries())
}
