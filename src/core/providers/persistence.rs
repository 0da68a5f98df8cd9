//! Persistence collaborator contract.
//!
//! Invoked once, from the finalizer. Each call is independently fallible so a
//! failing store can never block teardown; the finalizer records which calls
//! failed and reports a reconciliation flag instead of erroring out.

use crate::core::session::state::{CloseReason, TranscriptEntry};

/// Usage consumed by one session, for billing reconciliation downstream.
#[derive(Debug, Clone)]
pub struct UsageRecord {
    pub session_id: String,
    pub user_id: String,
    pub elapsed_ms: u64,
    pub turns: u32,
    pub close_reason: CloseReason,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum PersistError {
    #[error("persistence backend error: {0}")]
    Backend(String),
}

/// Contract for the persistence collaborator.
#[async_trait::async_trait]
pub trait Persistence: Send + Sync {
    /// Store the final transcript.
    async fn store_transcript(
        &self,
        session_id: &str,
        transcript: &[TranscriptEntry],
    ) -> Result<(), PersistError>;

    /// Deduct consumed usage.
    async fn record_usage(&self, usage: &UsageRecord) -> Result<(), PersistError>;

    /// Notify downstream analytics that the session ended.
    async fn notify_session_ended(
        &self,
        session_id: &str,
        reason: CloseReason,
    ) -> Result<(), PersistError>;
}

/// Default collaborator that only logs. Used when no backend is configured
/// and in tests that do not assert on persistence.
pub struct LoggingPersistence;

#[async_trait::async_trait]
impl Persistence for LoggingPersistence {
    async fn store_transcript(
        &self,
        session_id: &str,
        transcript: &[TranscriptEntry],
    ) -> Result<(), PersistError> {
        tracing::info!(
            session_id,
            entries = transcript.len(),
            "transcript discarded (no persistence backend)"
        );
        Ok(())
    }

    async fn record_usage(&self, usage: &UsageRecord) -> Result<(), PersistError> {
        tracing::info!(
            session_id = %usage.session_id,
            elapsed_ms = usage.elapsed_ms,
            turns = usage.turns,
            "usage discarded (no persistence backend)"
        );
        Ok(())
    }

    async fn notify_session_ended(
        &self,
        session_id: &str,
        reason: CloseReason,
    ) -> Result<(), PersistError> {
        tracing::info!(session_id, reason = reason.as_str(), "session ended");
        Ok(())
    }
}
