//! # WebSocket Session Handler Module
//!
//! Real-time tutoring sessions over one WebSocket connection per client.
//!
//! ## Connection Flow
//! 1. Client connects to `/ws`
//! 2. Client sends an `init` message (profile, audience band, optional
//!    `resume_session_id` to reclaim a parked session)
//! 3. Server responds with `{"type": "ready", "session_id": "...", "resumed": false}`
//! 4. Client streams raw PCM16-LE binary frames; server streams JSON state
//!    messages plus binary tutor audio (8-byte big-endian generation prefix)
//!
//! ## Message Types
//!
//! **Incoming:**
//! - `{"type": "init", "user_id": "...", "band": "standard", ...}` - Start or resume a session
//! - `{"type": "text_message", "text": "..."}` - Text-mode turn
//! - `{"type": "pong"}` - Heartbeat answer
//! - `{"type": "client_visibility", "visible": false}` - Tab hidden/shown
//! - `{"type": "client_end_intent"}` - Client intends to leave soon
//! - `{"type": "end"}` - Graceful termination
//! - **Binary messages** - Raw student audio for recognition
//!
//! **Outgoing:**
//! - `transcript`, `transcript_update` - Committed lines and live hypothesis
//! - `phase_update` - Conversation phase transitions
//! - `tutor_thinking`, `tutor_responding`, `tutor_interrupted`, `tutor_error`
//! - `duck`, `unduck`, `interrupt` - Barge-in playback control
//! - `queued_user_turn` - Turn accepted while the tutor holds the floor
//! - `stt_status` - Recognizer lifecycle (connected/reconnecting/degraded/failed)
//! - `ping`, `session_ended`, `error`
//! - **Binary messages** - Generation-tagged synthesized tutor audio

pub mod handler;
pub mod messages;

pub use handler::ws_session_handler;
pub use messages::{IncomingMessage, MessageRoute, OutgoingMessage};
