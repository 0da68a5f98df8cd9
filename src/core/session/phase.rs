//! Session phase state machine.
//!
//! The phase is the single authoritative gate for every component in the
//! session: the turn pipeline, the barge-in controller and the resilience
//! layer all consult it before acting, and only the session actor mutates it.
//! Transitions are explicit triggers and every successful transition produces
//! a [`PhaseChange`] record that is forwarded to the transport peer and the
//! log stream.

use crate::utils::epoch_ms;

/// Conversation phase for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for the student to speak.
    Listening,
    /// The signal gate has seen speech energy and partial transcripts exist.
    SpeechDetected,
    /// A finished utterance has been accepted for processing.
    TurnCommitted,
    /// Generation is in flight but no audio has been produced yet.
    AwaitingResponse,
    /// Synthesized tutor audio is streaming to the client.
    TutorSpeaking,
    /// Terminal teardown state; nothing may act after this.
    Finalizing,
}

impl Phase {
    /// Wire name used in `phase_update` messages and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Listening => "listening",
            Phase::SpeechDetected => "speech_detected",
            Phase::TurnCommitted => "turn_committed",
            Phase::AwaitingResponse => "awaiting_response",
            Phase::TutorSpeaking => "tutor_speaking",
            Phase::Finalizing => "finalizing",
        }
    }

    /// True while the tutor holds the floor. Committing a turn in these
    /// phases must queue instead of transitioning.
    pub fn tutor_has_floor(&self) -> bool {
        matches!(self, Phase::AwaitingResponse | Phase::TutorSpeaking)
    }
}

/// Observable record of one transition.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseChange {
    pub previous: Phase,
    pub phase: Phase,
    pub reason: &'static str,
    pub at_ms: u64,
}

/// Rejected transition.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PhaseError {
    #[error("turn commit rejected while tutor has the floor ({0:?}); queue it")]
    MustQueue(Phase),
    #[error("session is finalizing; no further transitions")]
    Terminal,
}

/// The phase cell. Owned by the session actor; never shared.
#[derive(Debug)]
pub struct PhaseMachine {
    current: Phase,
}

impl PhaseMachine {
    pub fn new() -> Self {
        Self {
            current: Phase::Listening,
        }
    }

    pub fn current(&self) -> Phase {
        self.current
    }

    /// Attempt a transition. The two hard invariants live here:
    /// `Finalizing` is terminal, and `TurnCommitted` can never be entered
    /// while the tutor has the floor.
    pub fn transition(&mut self, to: Phase, reason: &'static str) -> Result<PhaseChange, PhaseError> {
        if self.current == Phase::Finalizing {
            return Err(PhaseError::Terminal);
        }
        if to == Phase::TurnCommitted && self.current.tutor_has_floor() {
            return Err(PhaseError::MustQueue(self.current));
        }
        let change = PhaseChange {
            previous: self.current,
            phase: to,
            reason,
            at_ms: epoch_ms(),
        };
        self.current = to;
        Ok(change)
    }
}

impl Default for PhaseMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_listening() {
        let m = PhaseMachine::new();
        assert_eq!(m.current(), Phase::Listening);
    }

    #[test]
    fn commit_rejected_while_tutor_has_floor() {
        let mut m = PhaseMachine::new();
        m.transition(Phase::TurnCommitted, "turn").unwrap();
        m.transition(Phase::AwaitingResponse, "dispatch").unwrap();
        assert_eq!(
            m.transition(Phase::TurnCommitted, "second turn"),
            Err(PhaseError::MustQueue(Phase::AwaitingResponse))
        );

        m.transition(Phase::TutorSpeaking, "first audio").unwrap();
        assert_eq!(
            m.transition(Phase::TurnCommitted, "third turn"),
            Err(PhaseError::MustQueue(Phase::TutorSpeaking))
        );
        // Phase unchanged by the rejections.
        assert_eq!(m.current(), Phase::TutorSpeaking);
    }

    #[test]
    fn finalizing_is_terminal() {
        let mut m = PhaseMachine::new();
        m.transition(Phase::Finalizing, "end").unwrap();
        assert_eq!(
            m.transition(Phase::Listening, "nope"),
            Err(PhaseError::Terminal)
        );
    }

    #[test]
    fn change_records_previous_phase_and_reason() {
        let mut m = PhaseMachine::new();
        let change = m.transition(Phase::SpeechDetected, "energy").unwrap();
        assert_eq!(change.previous, Phase::Listening);
        assert_eq!(change.phase, Phase::SpeechDetected);
        assert_eq!(change.reason, "energy");
        assert!(change.at_ms > 0);
    }
}
