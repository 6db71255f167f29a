//! Raw JSON envelope: `{ "type": string, "data"?: object, "timestamp": number }`

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{LumenError, Result};

/// Untyped wire envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Message type name
    #[serde(rename = "type")]
    pub kind: String,
    /// Optional payload object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Milliseconds since epoch at the sender
    #[serde(default)]
    pub timestamp: u64,
}

impl Envelope {
    /// Parse a text frame
    pub fn from_json(text: &str) -> Result<Self> {
        let envelope: Envelope = serde_json::from_str(text)
            .map_err(|e| LumenError::protocol(format!("malformed envelope: {e}")))?;
        if envelope.kind.is_empty() {
            return Err(LumenError::protocol("envelope type is empty"));
        }
        if let Some(data) = &envelope.data {
            if !data.is_object() && !data.is_null() {
                return Err(LumenError::protocol(format!(
                    "envelope data for '{}' must be an object",
                    envelope.kind
                )));
            }
        }
        Ok(envelope)
    }

    /// Encode as a text frame
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal() {
        let env = Envelope::from_json(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(env.kind, "ping");
        assert!(env.data.is_none());
        assert_eq!(env.timestamp, 0);
    }

    #[test]
    fn test_rejects_malformed() {
        assert!(Envelope::from_json("not json").is_err());
        assert!(Envelope::from_json(r#"{"data":{}}"#).is_err());
        assert!(Envelope::from_json(r#"{"type":""}"#).is_err());
        assert!(Envelope::from_json(r#"{"type":"x","data":[1,2]}"#).is_err());
    }

    #[test]
    fn test_data_omitted_when_absent() {
        let env = Envelope {
            kind: "pong".into(),
            data: None,
            timestamp: 5,
        };
        assert_eq!(env.to_json().unwrap(), r#"{"type":"pong","timestamp":5}"#);
    }
}
