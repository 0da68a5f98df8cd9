//! WebSocket message types.
//!
//! All JSON frames on the session transport, both directions, discriminated
//! by a `type` tag. Student audio arrives as raw binary frames; tutor audio
//! leaves as binary frames with an 8-byte big-endian generation id prefix so
//! clients can drop stale chunks without parsing JSON.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// Incoming JSON frames.
#[derive(Debug, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum IncomingMessage {
    /// First message on any connection: start a session or resume a parked
    /// one within its grace window.
    #[serde(rename = "init")]
    Init {
        user_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        profile_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        subject: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        language: Option<String>,
        /// Audience band key ("young", "standard", "adult").
        #[serde(skip_serializing_if = "Option::is_none")]
        band: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        document: Option<String>,
        /// Present when reclaiming a session after an abnormal disconnect.
        #[serde(skip_serializing_if = "Option::is_none")]
        resume_session_id: Option<String>,
    },
    /// Text-mode equivalent of a committed spoken turn.
    #[serde(rename = "text_message")]
    TextMessage { text: String },
    #[serde(rename = "ping")]
    Ping,
    #[serde(rename = "pong")]
    Pong,
    #[serde(rename = "client_visibility")]
    ClientVisibility { visible: bool },
    #[serde(rename = "client_end_intent")]
    ClientEndIntent,
    /// Explicit graceful termination.
    #[serde(rename = "end")]
    End,
}

/// Outgoing JSON frames.
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum OutgoingMessage {
    #[serde(rename = "ready")]
    Ready {
        session_id: String,
        resumed: bool,
    },
    /// Committed transcript line.
    #[serde(rename = "transcript")]
    Transcript {
        speaker: &'static str,
        text: String,
    },
    /// Live partial hypothesis (replace-only).
    #[serde(rename = "transcript_update")]
    TranscriptUpdate { text: String },
    #[serde(rename = "phase_update")]
    PhaseUpdate {
        phase: &'static str,
        previous: &'static str,
        reason: &'static str,
    },
    #[serde(rename = "tutor_thinking")]
    TutorThinking,
    #[serde(rename = "tutor_responding")]
    TutorResponding { generation: u64 },
    #[serde(rename = "tutor_interrupted")]
    TutorInterrupted,
    #[serde(rename = "tutor_error")]
    TutorError { message: String },
    #[serde(rename = "duck")]
    Duck,
    #[serde(rename = "unduck")]
    Unduck,
    /// Hard stop: discard buffered playback now.
    #[serde(rename = "interrupt")]
    Interrupt { generation: u64 },
    #[serde(rename = "queued_user_turn")]
    QueuedUserTurn { text: String },
    #[serde(rename = "stt_status")]
    SttStatus { status: &'static str },
    #[serde(rename = "ping")]
    Ping,
    #[serde(rename = "pong")]
    Pong,
    #[serde(rename = "session_ended")]
    SessionEnded { reason: &'static str },
    #[serde(rename = "error")]
    Error { message: String },
}

/// Route for one outbound frame.
#[derive(Debug)]
pub enum MessageRoute {
    Outgoing(OutgoingMessage),
    /// Pre-framed binary payload (generation-tagged tutor audio).
    Binary(Bytes),
}

/// Frame one tutor audio chunk: 8-byte big-endian generation id, then the
/// encoded audio.
pub fn frame_audio_chunk(generation: u64, audio: &Bytes) -> Bytes {
    let mut framed = BytesMut::with_capacity(8 + audio.len());
    framed.put_u64(generation);
    framed.extend_from_slice(audio);
    framed.freeze()
}

/// Split a framed audio chunk back into (generation, audio). Used by tests
/// and reference clients.
pub fn parse_audio_chunk(frame: &Bytes) -> Option<(u64, Bytes)> {
    if frame.len() < 8 {
        return None;
    }
    let mut generation_bytes = [0u8; 8];
    generation_bytes.copy_from_slice(&frame[..8]);
    Some((u64::from_be_bytes(generation_bytes), frame.slice(8..)))
}
