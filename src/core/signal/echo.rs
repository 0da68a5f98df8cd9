//! Echo guard.
//!
//! When the client plays tutor audio on speakers, the microphone hears it and
//! the recognizer happily transcribes the system's own words back. The guard
//! keeps a short window of recently synthesized sentences and suppresses
//! transcripts that mostly overlap one of them.

use std::collections::VecDeque;

use crate::utils::{epoch_ms, normalize_text};

/// How long a synthesized sentence stays eligible for echo matching, and how
/// similar a transcript must be to count as an echo.
#[derive(Debug, Clone)]
pub struct EchoGuardConfig {
    pub window_ms: u64,
    /// Fraction of transcript tokens that must appear in one recent sentence.
    pub overlap_threshold: f32,
    /// Transcripts shorter than this many tokens are never suppressed;
    /// "yes" overlapping tutor output is not evidence of echo.
    pub min_tokens: usize,
    pub max_entries: usize,
}

impl Default for EchoGuardConfig {
    fn default() -> Self {
        Self {
            window_ms: 6000,
            overlap_threshold: 0.8,
            min_tokens: 3,
            max_entries: 16,
        }
    }
}

/// Ring of recently spoken tutor sentences.
pub struct EchoGuard {
    config: EchoGuardConfig,
    recent: VecDeque<(String, u64)>,
}

impl EchoGuard {
    pub fn new(config: EchoGuardConfig) -> Self {
        Self {
            config,
            recent: VecDeque::new(),
        }
    }

    /// Record a sentence the tutor just spoke.
    pub fn note_spoken(&mut self, sentence: &str) {
        let normalized = normalize_text(sentence);
        if normalized.is_empty() {
            return;
        }
        self.recent.push_back((normalized, epoch_ms()));
        while self.recent.len() > self.config.max_entries {
            self.recent.pop_front();
        }
    }

    /// True when `transcript` looks like an echo of recent tutor output.
    pub fn is_echo(&mut self, transcript: &str) -> bool {
        let now = epoch_ms();
        while let Some((_, at)) = self.recent.front() {
            if now.saturating_sub(*at) > self.config.window_ms {
                self.recent.pop_front();
            } else {
                break;
            }
        }

        let normalized = normalize_text(transcript);
        let tokens: Vec<&str> = normalized.split(' ').filter(|t| !t.is_empty()).collect();
        if tokens.len() < self.config.min_tokens {
            return false;
        }

        self.recent.iter().any(|(sentence, _)| {
            let matched = tokens
                .iter()
                .filter(|t| sentence.split(' ').any(|s| s == **t))
                .count();
            matched as f32 / tokens.len() as f32 >= self.config.overlap_threshold
        })
    }

    pub fn clear(&mut self) {
        self.recent.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard() -> EchoGuard {
        EchoGuard::new(EchoGuardConfig::default())
    }

    #[test]
    fn suppresses_near_verbatim_echo() {
        let mut g = guard();
        g.note_spoken("The capital of France is Paris.");
        assert!(g.is_echo("the capital of france is paris"));
        assert!(g.is_echo("capital of France is Paris"));
    }

    #[test]
    fn passes_genuine_student_speech() {
        let mut g = guard();
        g.note_spoken("The capital of France is Paris.");
        assert!(!g.is_echo("what about the capital of Germany then"));
    }

    #[test]
    fn short_answers_never_suppressed() {
        let mut g = guard();
        g.note_spoken("Yes, that is right, seven.");
        // Two tokens, below min_tokens: even full overlap passes through.
        assert!(!g.is_echo("yes seven"));
    }

    #[test]
    fn nothing_matches_an_empty_guard() {
        let mut g = guard();
        assert!(!g.is_echo("hello there my friend"));
    }

    #[test]
    fn entries_cap_is_enforced() {
        let mut g = EchoGuard::new(EchoGuardConfig {
            max_entries: 2,
            ..Default::default()
        });
        g.note_spoken("sentence one here now");
        g.note_spoken("sentence two here now");
        g.note_spoken("sentence three here now");
        assert_eq!(g.recent.len(), 2);
    }
}
