//! Lumen Core - shared state model for the sync layer
//!
//! This crate holds the pieces both ends of the sync layer agree on:
//!
//! - [`StateSnapshot`], [`Experience`] and [`Injection`]: the data model
//! - [`EvolutionEngine`]: the pure `(state, experience) -> state` function
//! - [`protocol`]: the JSON envelope and typed messages
//! - [`LumenError`]: the unified error type
//!
//! Nothing here performs I/O; the sync client and the bridge own the runtime.

#![allow(missing_docs)]
#![forbid(unsafe_code)]

/// Unified error handling
pub mod errors;

/// Pure state evolution
pub mod evolution;

/// Wire envelope and typed messages
pub mod protocol;

/// Wall-clock helpers
pub mod time;

/// Data model
pub mod types;

pub use errors::{LumenError, Result};
pub use evolution::{evolve, EvolutionConfig, EvolutionEngine};
pub use protocol::{Envelope, Message, MessageKind};
pub use types::{
    Experience, ExperienceId, ExperienceInput, Injection, InjectionId, InjectionKind,
    InjectionStatus, Phase, PhaseTable, SessionId, StateSnapshot,
};
