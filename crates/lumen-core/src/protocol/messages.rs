//! Typed messages carried inside [`Envelope`]s

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use super::envelope::Envelope;
use crate::errors::{LumenError, Result};
use crate::time::now_millis;
use crate::types::{Experience, ExperienceId, Injection, InjectionKind, SessionId, StateSnapshot};

/// Every message type understood on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Ping,
    Pong,
    Connected,
    Experience,
    ExperienceAck,
    StateSync,
    GetState,
    StateResponse,
    Query,
    QueryResponse,
    InjectionRequest,
    InjectionResult,
    Status,
    Error,
}

impl MessageKind {
    /// Canonical wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Connected => "connected",
            Self::Experience => "experience",
            Self::ExperienceAck => "experience_ack",
            Self::StateSync => "state_sync",
            Self::GetState => "get_state",
            Self::StateResponse => "state_response",
            Self::Query => "query",
            Self::QueryResponse => "query_response",
            Self::InjectionRequest => "injection_request",
            Self::InjectionResult => "injection_result",
            Self::Status => "status",
            Self::Error => "error",
        }
    }

    /// Resolve a wire name; `consciousness_sync` is an alias of `state_sync`
    pub fn parse(name: &str) -> Option<Self> {
        let kind = match name {
            "ping" => Self::Ping,
            "pong" => Self::Pong,
            "connected" => Self::Connected,
            "experience" => Self::Experience,
            "experience_ack" => Self::ExperienceAck,
            "state_sync" | "consciousness_sync" => Self::StateSync,
            "get_state" => Self::GetState,
            "state_response" => Self::StateResponse,
            "query" => Self::Query,
            "query_response" => Self::QueryResponse,
            "injection_request" => Self::InjectionRequest,
            "injection_result" => Self::InjectionResult,
            "status" => Self::Status,
            "error" => Self::Error,
            _ => return None,
        };
        Some(kind)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sent by the bridge right after accepting a connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectedPayload {
    pub session_id: SessionId,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub backend_available: bool,
}

/// One Experience forwarded by a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperiencePayload {
    pub id: ExperienceId,
    pub content: String,
    #[serde(default)]
    pub context: BTreeMap<String, String>,
    #[serde(default)]
    pub outcome: BTreeMap<String, f64>,
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub timestamp: u64,
    /// State after the client applied the Experience locally
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<StateSnapshot>,
}

impl ExperiencePayload {
    /// Wire form of a recorded Experience
    pub fn from_experience(experience: &Experience, platform: impl Into<String>) -> Self {
        Self {
            id: experience.id(),
            content: experience.content().to_string(),
            context: experience.context().clone(),
            outcome: experience.outcome().clone(),
            platform: platform.into(),
            timestamp: experience.created_at(),
            state: Some(experience.state_after().clone()),
        }
    }
}

/// Receipt for one Experience
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperienceAck {
    pub id: ExperienceId,
}

/// Authoritative (or synthesized, when `degraded`) state push
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSyncPayload {
    pub state: StateSnapshot,
    #[serde(default)]
    pub degraded: bool,
}

/// Answer to `get_state`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateResponsePayload {
    pub state: Option<StateSnapshot>,
    #[serde(default)]
    pub degraded: bool,
}

/// Free-form query routed to the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryPayload {
    pub query: String,
    #[serde(default)]
    pub params: Value,
}

/// Answer to a query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponsePayload {
    pub query: String,
    pub answer: Value,
    #[serde(default)]
    pub degraded: bool,
}

/// Client request to start an Injection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InjectionRequestPayload {
    pub target_process: String,
    pub kind: InjectionKind,
    pub requested_level: f64,
}

/// Backend availability change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusPayload {
    pub backend_available: bool,
    #[serde(default)]
    pub message: String,
}

/// Reported problem; the connection stays open
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
}

/// Typed view of an envelope
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Ping,
    Pong,
    Connected(ConnectedPayload),
    Experience(ExperiencePayload),
    ExperienceAck(ExperienceAck),
    StateSync(StateSyncPayload),
    GetState,
    StateResponse(StateResponsePayload),
    Query(QueryPayload),
    QueryResponse(QueryResponsePayload),
    InjectionRequest(InjectionRequestPayload),
    InjectionResult(Injection),
    Status(StatusPayload),
    Error(ErrorPayload),
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Ping => MessageKind::Ping,
            Self::Pong => MessageKind::Pong,
            Self::Connected(_) => MessageKind::Connected,
            Self::Experience(_) => MessageKind::Experience,
            Self::ExperienceAck(_) => MessageKind::ExperienceAck,
            Self::StateSync(_) => MessageKind::StateSync,
            Self::GetState => MessageKind::GetState,
            Self::StateResponse(_) => MessageKind::StateResponse,
            Self::Query(_) => MessageKind::Query,
            Self::QueryResponse(_) => MessageKind::QueryResponse,
            Self::InjectionRequest(_) => MessageKind::InjectionRequest,
            Self::InjectionResult(_) => MessageKind::InjectionResult,
            Self::Status(_) => MessageKind::Status,
            Self::Error(_) => MessageKind::Error,
        }
    }

    /// Shorthand for an error message
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(ErrorPayload {
            message: message.into(),
        })
    }

    /// Decode an envelope; unknown types and bad payloads are protocol errors
    pub fn from_envelope(envelope: &Envelope) -> Result<Self> {
        let kind = MessageKind::parse(&envelope.kind).ok_or_else(|| {
            LumenError::protocol(format!("unknown message type '{}'", envelope.kind))
        })?;

        let message = match kind {
            MessageKind::Ping => Self::Ping,
            MessageKind::Pong => Self::Pong,
            MessageKind::GetState => Self::GetState,
            MessageKind::Connected => Self::Connected(payload(envelope)?),
            MessageKind::Experience => Self::Experience(payload(envelope)?),
            MessageKind::ExperienceAck => Self::ExperienceAck(payload(envelope)?),
            MessageKind::StateSync => Self::StateSync(payload(envelope)?),
            MessageKind::StateResponse => Self::StateResponse(payload(envelope)?),
            MessageKind::Query => Self::Query(payload(envelope)?),
            MessageKind::QueryResponse => Self::QueryResponse(payload(envelope)?),
            MessageKind::InjectionRequest => Self::InjectionRequest(payload(envelope)?),
            MessageKind::InjectionResult => Self::InjectionResult(payload(envelope)?),
            MessageKind::Status => Self::Status(payload(envelope)?),
            MessageKind::Error => Self::Error(payload(envelope)?),
        };
        Ok(message)
    }

    /// Parse a text frame straight into a message
    pub fn from_json(text: &str) -> Result<Self> {
        Self::from_envelope(&Envelope::from_json(text)?)
    }

    /// Encode into an envelope stamped with `timestamp`
    pub fn to_envelope(&self, timestamp: u64) -> Result<Envelope> {
        let data = match self {
            Self::Ping | Self::Pong | Self::GetState => None,
            Self::Connected(p) => Some(serde_json::to_value(p)?),
            Self::Experience(p) => Some(serde_json::to_value(p)?),
            Self::ExperienceAck(p) => Some(serde_json::to_value(p)?),
            Self::StateSync(p) => Some(serde_json::to_value(p)?),
            Self::StateResponse(p) => Some(serde_json::to_value(p)?),
            Self::Query(p) => Some(serde_json::to_value(p)?),
            Self::QueryResponse(p) => Some(serde_json::to_value(p)?),
            Self::InjectionRequest(p) => Some(serde_json::to_value(p)?),
            Self::InjectionResult(p) => Some(serde_json::to_value(p)?),
            Self::Status(p) => Some(serde_json::to_value(p)?),
            Self::Error(p) => Some(serde_json::to_value(p)?),
        };
        Ok(Envelope {
            kind: self.kind().as_str().to_string(),
            data,
            timestamp,
        })
    }

    /// Encode as a text frame stamped with the current time
    pub fn to_json(&self) -> Result<String> {
        self.to_envelope(now_millis())?.to_json()
    }
}

fn payload<T: DeserializeOwned>(envelope: &Envelope) -> Result<T> {
    let data = envelope.data.clone().ok_or_else(|| {
        LumenError::protocol(format!("'{}' message requires data", envelope.kind))
    })?;
    serde_json::from_value(data)
        .map_err(|e| LumenError::protocol(format!("invalid '{}' payload: {e}", envelope.kind)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evolution::EvolutionEngine;
    use crate::types::ExperienceInput;
    use assert_matches::assert_matches;

    #[test]
    fn test_consciousness_sync_alias() {
        let engine = EvolutionEngine::default();
        let state = engine.initial_state("web-1", 0.5, 0);
        let text = serde_json::json!({
            "type": "consciousness_sync",
            "data": { "state": state },
            "timestamp": 1,
        })
        .to_string();

        let message = Message::from_json(&text).unwrap();
        assert_matches!(message, Message::StateSync(StateSyncPayload { degraded: false, .. }));
        assert_eq!(message.to_envelope(1).unwrap().kind, "state_sync");
    }

    #[test]
    fn test_unknown_type_is_protocol_error() {
        let err = Message::from_json(r#"{"type":"teleport","timestamp":1}"#).unwrap_err();
        assert_matches!(err, LumenError::Protocol { .. });
    }

    #[test]
    fn test_missing_payload_is_protocol_error() {
        let err = Message::from_json(r#"{"type":"experience","timestamp":1}"#).unwrap_err();
        assert_matches!(err, LumenError::Protocol { .. });
    }

    #[test]
    fn test_experience_payload_carries_state_after() {
        let engine = EvolutionEngine::default();
        let state = engine.initial_state("web-1", 0.5, 0);
        let exp = engine.record(&state, ExperienceInput::new("hi").with_context("k", "v"), 9);
        let payload = ExperiencePayload::from_experience(&exp, "web");

        let env = Message::Experience(payload.clone()).to_envelope(9).unwrap();
        let data = env.data.as_ref().unwrap();
        assert_eq!(data["content"], "hi");
        assert_eq!(data["platform"], "web");
        assert_eq!(data["context"]["k"], "v");
        assert_eq!(Message::from_envelope(&env).unwrap(), Message::Experience(payload));
    }

    #[test]
    fn test_injection_request_shape() {
        let text = r#"{"type":"injection_request","timestamp":3,
            "data":{"target_process":"audio","kind":"dampen","requested_level":0.3}}"#;
        assert_matches!(
            Message::from_json(text).unwrap(),
            Message::InjectionRequest(InjectionRequestPayload { kind: InjectionKind::Dampen, .. })
        );
    }
}
