//! Root session state.
//!
//! One [`SessionState`] per connection, owned exclusively by the session
//! actor and mutated only inside its event loop. Everything transient
//! (candidates, barge-in state, pipeline queue) lives in the components; this
//! is the durable part that must survive a reconnect untouched.

use crate::core::providers::ChatMessage;
use crate::core::session::phase::PhaseMachine;
use crate::utils::epoch_ms;

/// Who said a transcript line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    Student,
    Tutor,
}

impl Speaker {
    pub fn as_str(&self) -> &'static str {
        match self {
            Speaker::Student => "student",
            Speaker::Tutor => "tutor",
        }
    }
}

/// One line of the conversation. Immutable once appended.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TranscriptEntry {
    pub id: u64,
    pub speaker: Speaker,
    pub text: String,
    pub timestamp_ms: u64,
}

/// Why a session ended. Persisted and user-visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    UserEnd,
    InactivityTimeout,
    WebsocketDisconnect,
    DisconnectTimeout,
    ServerError,
    MinutesExhausted,
    ServerShutdown,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::UserEnd => "user_end",
            CloseReason::InactivityTimeout => "inactivity_timeout",
            CloseReason::WebsocketDisconnect => "websocket_disconnect",
            CloseReason::DisconnectTimeout => "disconnect_timeout",
            CloseReason::ServerError => "server_error",
            CloseReason::MinutesExhausted => "minutes_exhausted",
            CloseReason::ServerShutdown => "server_shutdown",
        }
    }
}

/// Session identity and profile, from the `init` message.
#[derive(Debug, Clone)]
pub struct SessionProfile {
    pub user_id: String,
    pub profile_id: Option<String>,
    pub subject: Option<String>,
    pub language: String,
    /// Audience band key selecting the timing profile.
    pub band: String,
    /// Optional lesson document passed through to the model.
    pub document: Option<String>,
}

pub struct SessionState {
    pub session_id: String,
    pub profile: SessionProfile,
    pub transcript: Vec<TranscriptEntry>,
    /// Conversation history as sent to the model. Parallel to the
    /// transcript but only holds completed exchanges.
    pub history: Vec<ChatMessage>,
    pub phase: PhaseMachine,
    /// Monotonically increasing playback generation id.
    generation: u64,
    pub safety_strikes: u32,
    pub reconnect_attempts: u32,
    pub turns_completed: u32,
    pub started_ms: u64,
    /// Set exactly once by the finalizer.
    pub ended: bool,
    next_entry_id: u64,
}

impl SessionState {
    pub fn new(session_id: String, profile: SessionProfile) -> Self {
        Self {
            session_id,
            profile,
            transcript: Vec::new(),
            history: Vec::new(),
            phase: PhaseMachine::new(),
            generation: 0,
            safety_strikes: 0,
            reconnect_attempts: 0,
            turns_completed: 0,
            started_ms: epoch_ms(),
            ended: false,
            next_entry_id: 1,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Open a new response generation. Anything tagged with an older id is
    /// stale from this point on.
    pub fn bump_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    pub fn append_transcript(&mut self, speaker: Speaker, text: &str) -> &TranscriptEntry {
        let entry = TranscriptEntry {
            id: self.next_entry_id,
            speaker,
            text: text.to_string(),
            timestamp_ms: epoch_ms(),
        };
        self.next_entry_id += 1;
        self.transcript.push(entry);
        self.transcript.last().expect("just pushed")
    }

    /// Record one completed student/tutor exchange into transcript and model
    /// history together, keeping them consistent.
    pub fn record_exchange(&mut self, turn: &str, reply: &str) {
        self.append_transcript(Speaker::Student, turn);
        self.append_transcript(Speaker::Tutor, reply);
        self.history.push(ChatMessage::user(turn));
        self.history.push(ChatMessage::assistant(reply));
        self.turns_completed += 1;
    }

    pub fn elapsed_ms(&self) -> u64 {
        epoch_ms().saturating_sub(self.started_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> SessionProfile {
        SessionProfile {
            user_id: "u1".to_string(),
            profile_id: None,
            subject: Some("math".to_string()),
            language: "en-US".to_string(),
            band: "standard".to_string(),
            document: None,
        }
    }

    #[test]
    fn generation_is_monotonic() {
        let mut s = SessionState::new("s1".to_string(), profile());
        assert_eq!(s.generation(), 0);
        assert_eq!(s.bump_generation(), 1);
        assert_eq!(s.bump_generation(), 2);
    }

    #[test]
    fn record_exchange_keeps_transcript_and_history_aligned() {
        let mut s = SessionState::new("s1".to_string(), profile());
        s.record_exchange("what is 7 times 8", "Seven times eight is fifty-six.");
        assert_eq!(s.transcript.len(), 2);
        assert_eq!(s.history.len(), 2);
        assert_eq!(s.transcript[0].speaker, Speaker::Student);
        assert_eq!(s.transcript[1].speaker, Speaker::Tutor);
        assert_eq!(s.history[0].role, "user");
        assert_eq!(s.history[1].role, "assistant");
        assert_eq!(s.turns_completed, 1);
    }

    #[test]
    fn transcript_ids_increase() {
        let mut s = SessionState::new("s1".to_string(), profile());
        let first = s.append_transcript(Speaker::Student, "a").id;
        let second = s.append_transcript(Speaker::Tutor, "b").id;
        assert!(second > first);
    }

    #[test]
    fn close_reason_wire_names() {
        assert_eq!(CloseReason::UserEnd.as_str(), "user_end");
        assert_eq!(CloseReason::DisconnectTimeout.as_str(), "disconnect_timeout");
        assert_eq!(CloseReason::MinutesExhausted.as_str(), "minutes_exhausted");
    }
}
