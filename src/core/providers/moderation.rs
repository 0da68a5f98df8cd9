//! Moderation collaborator contract.
//!
//! Policy lives outside the core; the turn pipeline only consumes the verdict
//! to decide whether normal generation proceeds or the safety branch fires.

/// Outcome of reviewing one student turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Normal generation proceeds.
    Appropriate,
    /// Generation is skipped; the safety branch handles the turn.
    Blocked(Severity),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Low,
    High,
}

/// Contract for the moderation collaborator.
///
/// A failing reviewer must not silence the student: implementations should
/// fail open (return `Appropriate`) and log, which is why the signature is
/// infallible.
#[async_trait::async_trait]
pub trait Moderation: Send + Sync {
    async fn review(&self, text: &str) -> Verdict;
}

/// Default reviewer used when no moderation backend is configured.
pub struct PassThroughModeration;

#[async_trait::async_trait]
impl Moderation for PassThroughModeration {
    async fn review(&self, _text: &str) -> Verdict {
        Verdict::Appropriate
    }
}
