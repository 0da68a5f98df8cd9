//! Session finalizer.
//!
//! The single teardown path for a session. The actor guards idempotence via
//! `SessionState::ended`; this module performs the best-effort collaborator
//! calls, each wrapped independently so a failing store can never block
//! teardown or skip its siblings. The report distinguishes a fully clean
//! teardown from one needing offline reconciliation.

use std::sync::Arc;

use tracing::{error, info};

use super::state::{CloseReason, SessionState};
use crate::core::providers::{Persistence, UsageRecord};

/// Outcome of the persistence phase of teardown.
#[derive(Debug, Clone)]
pub struct FinalizeReport {
    pub reason: CloseReason,
    pub transcript_persisted: bool,
    pub usage_recorded: bool,
    pub analytics_notified: bool,
}

impl FinalizeReport {
    /// Usage/financial correctness must never block teardown; when any leg
    /// failed the session is flagged for reconciliation instead.
    pub fn needs_reconciliation(&self) -> bool {
        !(self.transcript_persisted && self.usage_recorded && self.analytics_notified)
    }
}

/// Flush final session state to the persistence collaborator. The caller has
/// already cancelled timers and in-flight work; this only does the external
/// calls.
pub async fn flush_session(
    state: &SessionState,
    persistence: &Arc<dyn Persistence>,
    reason: CloseReason,
) -> FinalizeReport {
    let transcript_persisted = match persistence
        .store_transcript(&state.session_id, &state.transcript)
        .await
    {
        Ok(()) => true,
        Err(e) => {
            error!(session_id = %state.session_id, "transcript persistence failed: {e}");
            false
        }
    };

    let usage = UsageRecord {
        session_id: state.session_id.clone(),
        user_id: state.profile.user_id.clone(),
        elapsed_ms: state.elapsed_ms(),
        turns: state.turns_completed,
        close_reason: reason,
    };
    let usage_recorded = match persistence.record_usage(&usage).await {
        Ok(()) => true,
        Err(e) => {
            error!(session_id = %state.session_id, "usage recording failed: {e}");
            false
        }
    };

    let analytics_notified = match persistence
        .notify_session_ended(&state.session_id, reason)
        .await
    {
        Ok(()) => true,
        Err(e) => {
            error!(session_id = %state.session_id, "analytics notification failed: {e}");
            false
        }
    };

    let report = FinalizeReport {
        reason,
        transcript_persisted,
        usage_recorded,
        analytics_notified,
    };
    info!(
        session_id = %state.session_id,
        reason = reason.as_str(),
        reconciliation = report.needs_reconciliation(),
        "session flushed"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::providers::{PersistError, Persistence};
    use crate::core::session::state::{SessionProfile, TranscriptEntry};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyStore {
        transcript_calls: AtomicU32,
        fail_transcript: bool,
    }

    #[async_trait::async_trait]
    impl Persistence for FlakyStore {
        async fn store_transcript(
            &self,
            _session_id: &str,
            _transcript: &[TranscriptEntry],
        ) -> Result<(), PersistError> {
            self.transcript_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_transcript {
                Err(PersistError::Backend("down".to_string()))
            } else {
                Ok(())
            }
        }

        async fn record_usage(&self, _usage: &UsageRecord) -> Result<(), PersistError> {
            Ok(())
        }

        async fn notify_session_ended(
            &self,
            _session_id: &str,
            _reason: CloseReason,
        ) -> Result<(), PersistError> {
            Ok(())
        }
    }

    fn state() -> SessionState {
        SessionState::new(
            "s1".to_string(),
            SessionProfile {
                user_id: "u1".to_string(),
                profile_id: None,
                subject: None,
                language: "en-US".to_string(),
                band: "standard".to_string(),
                document: None,
            },
        )
    }

    #[tokio::test]
    async fn all_legs_ok_needs_no_reconciliation() {
        let store: Arc<dyn Persistence> = Arc::new(FlakyStore {
            transcript_calls: AtomicU32::new(0),
            fail_transcript: false,
        });
        let report = flush_session(&state(), &store, CloseReason::UserEnd).await;
        assert!(!report.needs_reconciliation());
        assert_eq!(report.reason, CloseReason::UserEnd);
    }

    #[tokio::test]
    async fn failed_transcript_still_runs_other_legs() {
        let flaky = Arc::new(FlakyStore {
            transcript_calls: AtomicU32::new(0),
            fail_transcript: true,
        });
        let store: Arc<dyn Persistence> = flaky.clone();
        let report = flush_session(&state(), &store, CloseReason::ServerError).await;
        assert!(report.needs_reconciliation());
        assert!(!report.transcript_persisted);
        // Usage and analytics were still attempted and succeeded.
        assert!(report.usage_recorded);
        assert!(report.analytics_notified);
        assert_eq!(flaky.transcript_calls.load(Ordering::SeqCst), 1);
    }
}
