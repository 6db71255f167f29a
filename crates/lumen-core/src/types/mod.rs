//! Data model shared by the sync client and the bridge

mod experience;
mod ids;
mod injection;
mod snapshot;

pub use experience::{Experience, ExperienceInput};
pub use ids::{ExperienceId, InjectionId, SessionId};
pub use injection::{Injection, InjectionKind, InjectionStatus};
pub use snapshot::{clamp_unit, Phase, PhaseTable, StateSnapshot};
