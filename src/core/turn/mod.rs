//! Turn handling: the continuation guard that decides when an utterance is
//! really finished, and the pipeline that serializes committed turns.

pub mod continuation;
pub mod pipeline;

pub use continuation::{ContinuationGuard, GuardConfig, GuardDecision, TurnCandidate};
pub use pipeline::{CommitOutcome, InProgressTurn, PipelineConfig, TurnPipeline};
