//! Continuation guard.
//!
//! Two-phase commit over end-of-turn events. The first end-of-turn only
//! creates a candidate and starts a grace timer; fragments arriving before
//! the timer fires are coalesced into the candidate and the timer restarts.
//! Only when the timer fires untouched is the accumulated text promoted to a
//! committed turn, exactly once. Grace duration adapts to how the utterance
//! ends: hedges and trailing connectives buy the student more time, a crisp
//! one-token answer gets less.

use once_cell::sync::Lazy;
use std::collections::HashSet;
use tracing::debug;

use crate::utils::{epoch_ms, normalize_text};

static HEDGE_PHRASES: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "um",
        "uh",
        "hmm",
        "er",
        "well",
        "let me think",
        "let me see",
        "i mean",
        "hold on",
        "wait a second",
    ]
});

static TRAILING_CONNECTIVES: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "and", "but", "or", "because", "so", "then", "if", "the", "a", "an", "to", "of", "plus",
        "minus", "times", "with", "like",
    ]
    .into_iter()
    .collect()
});

static FILLERS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    ["um", "uh", "hmm", "er", "mm", "hm", "ah", "oh"]
        .into_iter()
        .collect()
});

static CRISP_ANSWERS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    ["yes", "no", "yeah", "yep", "nope", "okay", "ok", "right", "correct", "done"]
        .into_iter()
        .collect()
});

/// Grace timing. Durations come from the audience band; the thresholds are
/// tuning, not protocol, and tests override them freely.
#[derive(Debug, Clone)]
pub struct GuardConfig {
    pub grace_default_ms: u64,
    /// Used for hedges, trailing connectives, short fills and low-confidence
    /// end-of-turn signals.
    pub grace_extended_ms: u64,
    /// Used for unambiguous one-token answers.
    pub grace_short_ms: u64,
    /// End-of-turn confidence below this defers the commit with the extended
    /// grace rather than committing immediately.
    pub low_confidence: f32,
    /// Window after a commit in which an identical fragment is treated as a
    /// duplicate rather than a new turn.
    pub duplicate_window_ms: u64,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            grace_default_ms: 1000,
            grace_extended_ms: 2500,
            grace_short_ms: 400,
            low_confidence: 0.55,
            duplicate_window_ms: 1500,
        }
    }
}

/// Accumulating candidate turn. Transient; discarded on commit or cancel.
#[derive(Debug)]
pub struct TurnCandidate {
    pub text: String,
    pub started_ms: u64,
    pub segments: u32,
}

/// What the session actor should do with its grace timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDecision {
    /// New candidate; start the grace timer with this duration.
    StartGrace(u64),
    /// Fragment coalesced; restart the grace timer with this duration.
    RestartGrace(u64),
    /// Nothing to act on (empty, duplicate).
    Ignored,
}

pub struct ContinuationGuard {
    config: GuardConfig,
    pending: Option<TurnCandidate>,
    last_committed: String,
    last_committed_ms: u64,
}

impl ContinuationGuard {
    pub fn new(config: GuardConfig) -> Self {
        Self {
            config,
            pending: None,
            last_committed: String::new(),
            last_committed_ms: 0,
        }
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Feed one end-of-turn event from the recognizer.
    pub fn on_end_of_turn(&mut self, text: &str, confidence: f32) -> GuardDecision {
        let normalized = normalize_text(text);
        if normalized.is_empty() {
            return GuardDecision::Ignored;
        }

        // A re-fire of what we just committed must not become a second turn.
        if normalized == self.last_committed
            && epoch_ms().saturating_sub(self.last_committed_ms) < self.config.duplicate_window_ms
        {
            debug!("duplicate end-of-turn within window, ignored");
            return GuardDecision::Ignored;
        }

        match self.pending.as_mut() {
            Some(candidate) => {
                let pending_normalized = normalize_text(&candidate.text);
                if pending_normalized.ends_with(&normalized) {
                    // Same content re-signalled; keep waiting but add nothing.
                    let grace = self.grace_for(&normalized, confidence);
                    return GuardDecision::RestartGrace(grace);
                }
                candidate.text.push(' ');
                candidate.text.push_str(text.trim());
                candidate.segments += 1;
                let segments = candidate.segments;
                let merged = normalize_text(&candidate.text);
                let grace = self.grace_for(&merged, confidence);
                debug!(
                    segments,
                    grace_ms = grace,
                    "fragment coalesced into pending turn"
                );
                GuardDecision::RestartGrace(grace)
            }
            None => {
                let grace = self.grace_for(&normalized, confidence);
                self.pending = Some(TurnCandidate {
                    text: text.trim().to_string(),
                    started_ms: epoch_ms(),
                    segments: 1,
                });
                GuardDecision::StartGrace(grace)
            }
        }
    }

    /// Called when the grace timer fires. Returns the committed turn text,
    /// or `None` when the candidate fails the minimum-content check.
    pub fn take_committed(&mut self) -> Option<String> {
        let candidate = self.pending.take()?;
        let normalized = normalize_text(&candidate.text);
        if normalized.is_empty() || Self::is_pure_filler(&normalized) {
            debug!("candidate dropped: below minimum content");
            return None;
        }
        self.last_committed = normalized;
        self.last_committed_ms = epoch_ms();
        Some(candidate.text)
    }

    /// Discard any pending candidate (finalize, interrupt of the student's
    /// own flow).
    pub fn cancel(&mut self) {
        self.pending = None;
    }

    fn grace_for(&self, normalized: &str, confidence: f32) -> u64 {
        let tokens: Vec<&str> = normalized.split(' ').filter(|t| !t.is_empty()).collect();

        if tokens.len() == 1 {
            let token = tokens[0];
            if CRISP_ANSWERS.contains(token) || token.parse::<f64>().is_ok() {
                return self.config.grace_short_ms;
            }
        }

        if confidence < self.config.low_confidence {
            return self.config.grace_extended_ms;
        }
        if HEDGE_PHRASES
            .iter()
            .any(|h| normalized == *h || normalized.ends_with(&format!(" {h}")))
        {
            return self.config.grace_extended_ms;
        }
        if let Some(last) = tokens.last() {
            if TRAILING_CONNECTIVES.contains(*last) {
                return self.config.grace_extended_ms;
            }
        }
        if tokens.len() <= 2 && tokens.iter().all(|t| FILLERS.contains(*t)) {
            return self.config.grace_extended_ms;
        }
        self.config.grace_default_ms
    }

    fn is_pure_filler(normalized: &str) -> bool {
        normalized
            .split(' ')
            .filter(|t| !t.is_empty())
            .all(|t| FILLERS.contains(t))
    }
}
