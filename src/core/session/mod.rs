//! Session core: phase machine, durable state, the event vocabulary, named
//! timers, the finalizer, and the actor that owns them all.

pub mod actor;
pub mod events;
pub mod finalizer;
pub mod phase;
pub mod state;
pub mod timers;

pub use actor::{SessionActor, SessionDeps};
pub use events::{DisconnectKind, OutboundSink, SessionEvent};
pub use finalizer::{flush_session, FinalizeReport};
pub use phase::{Phase, PhaseChange, PhaseError, PhaseMachine};
pub use state::{CloseReason, SessionProfile, SessionState, Speaker, TranscriptEntry};
pub use timers::{TimerKey, TimerScheduler};
