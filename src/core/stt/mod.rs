//! Streaming speech-to-text: provider contract, Deepgram client, and the
//! reconnecting adapter that the session actor drives.

pub mod adapter;
pub mod base;
pub mod deepgram;
pub mod mock;

pub use adapter::{RecognizerHandle, RecognizerStatus, RecognizerTuning, SttCommand};
pub use base::{BaseStt, SpeechEvent, SttConfig, SttError};
