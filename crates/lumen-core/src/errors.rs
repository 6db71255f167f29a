//! Unified error system for Lumen
//!
//! A single error type shared by the sync client and the bridge. Variants follow
//! the failure taxonomy of the sync layer: transport failures are recovered by the
//! reconnect state machine, protocol failures drop the offending message, backend
//! failures degrade responses, and exhaustion moves the client to standalone mode.

use serde::{Deserialize, Serialize};

/// Unified error type for all Lumen operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
pub enum LumenError {
    /// Connection refused, reset or timed out
    #[error("Transport error: {message}")]
    Transport {
        /// Error message describing the transport failure
        message: String,
    },

    /// Malformed or unexpected envelope
    #[error("Protocol error: {message}")]
    Protocol {
        /// Error message describing the protocol violation
        message: String,
    },

    /// The bridge has no reachable backend authority
    #[error("Backend unavailable: {message}")]
    BackendUnavailable {
        /// Error message describing why the backend leg is down
        message: String,
    },

    /// Reconnect attempts exhausted
    #[error("Reconnect attempts exhausted after {attempts} attempts")]
    Exhausted {
        /// Number of attempts made before giving up
        attempts: u32,
    },

    /// Invalid input or state transition
    #[error("Invalid: {message}")]
    Invalid {
        /// Error message describing the invalid input
        message: String,
    },

    /// Invalid configuration
    #[error("Configuration error: {message}")]
    Config {
        /// Error message describing the configuration problem
        message: String,
    },

    /// Serialization/deserialization error
    #[error("Serialization error: {message}")]
    Serialization {
        /// Error message describing the serialization failure
        message: String,
    },

    /// Internal system error
    #[error("Internal error: {message}")]
    Internal {
        /// Error message describing the internal error
        message: String,
    },
}

impl LumenError {
    /// Create a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create a backend unavailable error
    pub fn backend_unavailable(message: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            message: message.into(),
        }
    }

    /// Create an exhaustion error
    pub fn exhausted(attempts: u32) -> Self {
        Self::Exhausted { attempts }
    }

    /// Create an invalid input error
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether the reconnect state machine recovers from this error locally
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}

/// Standard Result type for Lumen operations
pub type Result<T> = std::result::Result<T, LumenError>;

impl From<serde_json::Error> for LumenError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

impl From<std::io::Error> for LumenError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::NotConnected
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::TimedOut => Self::transport(err.to_string()),
            _ => Self::internal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = LumenError::protocol("missing type");
        assert!(matches!(err, LumenError::Protocol { .. }));
        assert_eq!(err.to_string(), "Protocol error: missing type");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = LumenError::from(io_err);
        assert!(err.is_transport());

        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        assert!(matches!(LumenError::from(io_err), LumenError::Internal { .. }));
    }

    #[test]
    fn test_exhausted_message() {
        assert_eq!(
            LumenError::exhausted(5).to_string(),
            "Reconnect attempts exhausted after 5 attempts"
        );
    }
}
