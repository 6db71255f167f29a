//! HTTP request/response fallback
//!
//! `POST /api/query` accepts one envelope and answers it with a list of
//! envelopes, for clients that cannot hold a WebSocket open. The body's `data`
//! must carry the `instance_id`.
//!
//! With a backend configured the request is relayed over a short-lived leg and
//! the backend's answer is returned as-is. Without one, or when the backend does
//! not answer, the reply is synthesized from the state the bridge holds for the
//! instance and tagged `degraded`. Experiences always update that held state, so
//! an HTTP-only client sees its own progress in later answers.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use lumen_core::protocol::{ErrorPayload, ExperienceAck};
use lumen_core::time::now_millis;
use lumen_core::{Envelope, LumenError, Message};
use serde_json::Value;
use tracing::{debug, warn};

use crate::server::BridgeState;

/// Error body for rejected requests
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    error: LumenError,
}

impl ApiError {
    fn bad_request(error: LumenError) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            error,
        }
    }
}

impl From<LumenError> for ApiError {
    fn from(error: LumenError) -> Self {
        let status = match &error {
            LumenError::Protocol { .. } | LumenError::Invalid { .. } => StatusCode::BAD_REQUEST,
            LumenError::BackendUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self { status, error }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let body = ErrorPayload {
            message: self.error.to_string(),
        };
        (self.status, Json(body)).into_response()
    }
}

/// Answer one envelope
pub async fn query(
    State(state): State<BridgeState>,
    Json(envelope): Json<Envelope>,
) -> Result<Json<Vec<Envelope>>, ApiError> {
    let instance_id = instance_id(&envelope)?;
    let message = Message::from_envelope(&envelope).map_err(ApiError::bad_request)?;
    debug!(instance = %instance_id, kind = %message.kind(), "HTTP fallback request");

    let replies = match message {
        Message::Ping => vec![Message::Pong],
        message @ (Message::GetState | Message::Query(_) | Message::Experience(_)) => {
            answer(&state, &instance_id, message).await
        }
        other => {
            return Err(ApiError::bad_request(LumenError::protocol(format!(
                "'{}' is not served over HTTP",
                other.kind()
            ))))
        }
    };

    let now = now_millis();
    let envelopes = replies
        .iter()
        .map(|reply| reply.to_envelope(now))
        .collect::<lumen_core::Result<Vec<_>>>()?;
    Ok(Json(envelopes))
}

async fn answer(state: &BridgeState, instance_id: &str, message: Message) -> Vec<Message> {
    let sessions = &state.sessions;
    if let Message::Experience(payload) = &message {
        let latest = sessions.latest_for_instance(instance_id);
        let next = state.fallback.apply_experience(instance_id, latest, payload);
        sessions.hold_state(next);
    }

    if state.backend.is_configured() {
        match state.backend.request(instance_id, &message).await {
            Ok(replies) => {
                for reply in &replies {
                    match reply {
                        Message::StateSync(sync) if !sync.degraded => {
                            sessions.hold_state(sync.state.clone());
                        }
                        Message::StateResponse(response) if !response.degraded => {
                            if let Some(held) = &response.state {
                                sessions.hold_state(held.clone());
                            }
                        }
                        _ => {}
                    }
                }
                return replies;
            }
            Err(e) => {
                warn!(
                    instance = %instance_id,
                    error = %e,
                    "Backend did not answer, using fallback"
                );
            }
        }
    }

    let latest = sessions.latest_for_instance(instance_id);
    let fallback = &state.fallback;
    match message {
        Message::GetState => vec![Message::StateResponse(
            fallback.state_response(instance_id, latest),
        )],
        Message::Query(query) => vec![Message::QueryResponse(fallback.query_response(
            instance_id,
            latest,
            &query,
        ))],
        Message::Experience(payload) => vec![
            Message::ExperienceAck(ExperienceAck { id: payload.id }),
            Message::StateSync(fallback.state_sync(fallback.current_state(instance_id, latest))),
        ],
        _ => Vec::new(),
    }
}

fn instance_id(envelope: &Envelope) -> Result<String, ApiError> {
    envelope
        .data
        .as_ref()
        .and_then(|data| data.get("instance_id"))
        .and_then(Value::as_str)
        .filter(|id| !id.trim().is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            ApiError::bad_request(LumenError::invalid("data.instance_id is required"))
        })
}
