//! Message protocol shared by the sync client and the bridge
//!
//! Every frame is a JSON [`Envelope`]; [`Message`] is the typed view used by both
//! sides. Decoding failures surface as `LumenError::Protocol` so callers can drop
//! the frame without tearing the connection down.

mod envelope;
mod messages;

pub use envelope::Envelope;
pub use messages::{
    ConnectedPayload, ErrorPayload, ExperienceAck, ExperiencePayload, InjectionRequestPayload,
    Message, MessageKind, QueryPayload, QueryResponsePayload, StateResponsePayload,
    StateSyncPayload, StatusPayload,
};
