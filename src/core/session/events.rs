//! Session event types.
//!
//! Every input a session reacts to, from any source, is one of these
//! variants delivered through the session's single mpsc channel: transport
//! frames, recognizer output, response-task results, timer fires. This is
//! what makes mutation single-threaded by construction.

use bytes::Bytes;
use tokio::sync::mpsc;

use super::state::CloseReason;
use super::timers::TimerKey;
use crate::core::providers::Verdict;
use crate::core::stt::{RecognizerStatus, SpeechEvent};
use crate::handlers::ws::messages::MessageRoute;

/// Channel the actor writes outbound transport messages into. The socket
/// task on the other end serializes and sends them.
pub type OutboundSink = mpsc::Sender<MessageRoute>;

/// How the transport connection went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectKind {
    /// Explicit close or clean shutdown; no grace window.
    Graceful,
    /// Peer said it is going away (tab closed, app backgrounded).
    GoingAway,
    /// Abnormal drop; full grace window applies.
    Dropped,
}

/// One input to the session actor.
#[derive(Debug)]
pub enum SessionEvent {
    /// A (re)connected transport attached its outbound sink.
    Attach { sink: OutboundSink },
    /// Binary audio frame from the client.
    Audio(Bytes),
    /// Text-mode equivalent of a committed turn.
    TextTurn(String),
    Pong,
    Visibility { visible: bool },
    /// Client signalled it intends to leave soon.
    EndIntent,
    /// Explicit graceful termination request.
    End,
    SocketClosed(DisconnectKind),
    /// Normalized recognition event from the adapter.
    Speech(SpeechEvent),
    SttStatus(RecognizerStatus),
    /// Moderation result for a dispatched turn.
    ModerationVerdict { turn: String, verdict: Verdict },
    /// A completed sentence from the response task.
    Sentence { generation: u64, text: String },
    /// Synthesized audio for one sentence.
    AudioChunk { generation: u64, audio: Bytes },
    /// The response task finished (successfully or not).
    ResponseComplete {
        generation: u64,
        text: String,
        aborted: bool,
    },
    ResponseError { generation: u64, message: String },
    Timer(TimerKey),
    /// Host-initiated teardown (process shutdown).
    Shutdown(CloseReason),
}
