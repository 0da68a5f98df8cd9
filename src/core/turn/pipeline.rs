//! Turn commit pipeline.
//!
//! Single entry point for "the student finished a turn". Guarantees strict
//! FIFO processing with at most one turn in flight: commits arriving while
//! the tutor holds the floor coalesce into the tail of the queue instead of
//! becoming separate entries, and an explicit in-progress marker with a
//! timestamp lets the watchdog force-clear a leaked lock so the tutor can
//! never go permanently silent.

use std::collections::VecDeque;

use tracing::{debug, warn};

use crate::utils::epoch_ms;

/// Pipeline tuning.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// An in-progress marker older than this is considered leaked and
    /// force-cleared by the watchdog.
    pub stuck_ceiling_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stuck_ceiling_ms: 30_000,
        }
    }
}

/// The turn currently being processed.
#[derive(Debug, Clone)]
pub struct InProgressTurn {
    pub text: String,
    pub generation: u64,
    pub started_ms: u64,
}

/// Outcome of committing a finished utterance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Nothing in flight: process this text now.
    Dispatch(String),
    /// Tutor holds the floor or a turn is in flight: the text was merged
    /// into the queue tail. Carries the merged tail for the queued notice.
    Queued(String),
}

pub struct TurnPipeline {
    config: PipelineConfig,
    queue: VecDeque<String>,
    in_progress: Option<InProgressTurn>,
}

impl TurnPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            queue: VecDeque::new(),
            in_progress: None,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.in_progress.is_some()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn in_progress(&self) -> Option<&InProgressTurn> {
        self.in_progress.as_ref()
    }

    /// Accept a finished utterance. `tutor_has_floor` reflects the phase
    /// gate; queueing never transitions phase.
    ///
    /// Text always coalesces through the queue tail so FIFO order holds even
    /// when residue from an interrupted turn is still queued; dispatch pops
    /// from the front only when nothing is in flight and the floor is free.
    pub fn commit(&mut self, text: String, tutor_has_floor: bool) -> CommitOutcome {
        let merged = match self.queue.pop_back() {
            Some(mut tail) => {
                tail.push(' ');
                tail.push_str(text.trim());
                tail
            }
            None => text,
        };
        self.queue.push_back(merged.clone());

        if tutor_has_floor || self.in_progress.is_some() {
            debug!(queued = merged.len(), "turn coalesced into queue tail");
            CommitOutcome::Queued(merged)
        } else {
            let next = self.queue.pop_front().expect("just pushed");
            CommitOutcome::Dispatch(next)
        }
    }

    /// Mark a turn as in flight. Called by the actor right before spawning
    /// generation for it.
    pub fn begin(&mut self, text: String, generation: u64) {
        debug_assert!(self.in_progress.is_none());
        self.in_progress = Some(InProgressTurn {
            text,
            generation,
            started_ms: epoch_ms(),
        });
    }

    /// Release the in-progress marker and hand back the next queued turn, if
    /// any. Callers must process the returned text (drain strictly FIFO).
    pub fn finish(&mut self) -> Option<String> {
        self.in_progress = None;
        self.queue.pop_front()
    }

    /// True when the in-progress marker has outlived the stuck ceiling.
    pub fn is_stuck(&self) -> bool {
        match &self.in_progress {
            Some(turn) => epoch_ms().saturating_sub(turn.started_ms) > self.config.stuck_ceiling_ms,
            None => false,
        }
    }

    /// Force-clear a leaked in-progress marker. Returns the abandoned turn
    /// so the caller can abort its generation handles.
    pub fn force_clear(&mut self) -> Option<InProgressTurn> {
        let turn = self.in_progress.take();
        if let Some(t) = &turn {
            warn!(
                age_ms = epoch_ms().saturating_sub(t.started_ms),
                generation = t.generation,
                "force-clearing stuck turn lock"
            );
        }
        turn
    }

    /// Drop all queued turns (finalize).
    pub fn clear(&mut self) {
        self.queue.clear();
        self.in_progress = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipeline() -> TurnPipeline {
        TurnPipeline::new(PipelineConfig::default())
    }

    #[test]
    fn idle_commit_dispatches() {
        let mut p = pipeline();
        assert_eq!(
            p.commit("what is seven times eight".to_string(), false),
            CommitOutcome::Dispatch("what is seven times eight".to_string())
        );
        assert!(!p.is_busy());
    }

    #[test]
    fn commit_while_tutor_has_floor_queues() {
        let mut p = pipeline();
        let outcome = p.commit("wait".to_string(), true);
        assert_eq!(outcome, CommitOutcome::Queued("wait".to_string()));
        assert_eq!(p.queue_len(), 1);
    }

    #[test]
    fn queued_fragments_coalesce_into_one_entry() {
        let mut p = pipeline();
        p.begin("first turn".to_string(), 1);
        p.commit("also".to_string(), true);
        let outcome = p.commit("what about nine".to_string(), true);
        assert_eq!(
            outcome,
            CommitOutcome::Queued("also what about nine".to_string())
        );
        // One merged entry, not two.
        assert_eq!(p.queue_len(), 1);
        assert_eq!(p.finish(), Some("also what about nine".to_string()));
    }

    #[test]
    fn finish_drains_fifo() {
        let mut p = pipeline();
        p.begin("a".to_string(), 1);
        p.commit("b".to_string(), true);
        let next = p.finish().unwrap();
        assert_eq!(next, "b");
        assert!(!p.is_busy());
        assert_eq!(p.finish(), None);
    }

    #[test]
    fn busy_commit_queues_even_without_floor() {
        let mut p = pipeline();
        p.begin("a".to_string(), 1);
        let outcome = p.commit("b".to_string(), false);
        assert!(matches!(outcome, CommitOutcome::Queued(_)));
    }

    #[test]
    fn stuck_detection_uses_ceiling() {
        let mut p = TurnPipeline::new(PipelineConfig { stuck_ceiling_ms: 0 });
        assert!(!p.is_stuck());
        p.begin("a".to_string(), 1);
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(p.is_stuck());
        let abandoned = p.force_clear().unwrap();
        assert_eq!(abandoned.text, "a");
        assert!(!p.is_busy());
    }
}
