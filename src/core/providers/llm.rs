//! Language-model collaborator contract.
//!
//! The session core only needs two things from a model provider: a cancellable
//! stream of text chunks for a new student turn, and nothing else. History is
//! passed by snapshot so the provider never aliases session state.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// One entry of the conversation history sent to the model.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ChatMessage {
    /// "user" or "assistant".
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Error types for model streaming.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LlmError {
    #[error("model connection failed: {0}")]
    ConnectionFailed(String),
    #[error("model provider error: {0}")]
    ProviderError(String),
    #[error("model response malformed: {0}")]
    MalformedResponse(String),
}

/// A cancellable in-flight model call.
///
/// Dropping or aborting the stream cancels the underlying request; the
/// coordinator tags all chunks with the generation id before they leave the
/// response task, so the stream itself carries no tagging.
pub struct TokenStream {
    /// Text chunks in order. Closed when the model finishes or fails.
    pub chunks: mpsc::Receiver<Result<String, LlmError>>,
    handle: Option<JoinHandle<()>>,
}

impl TokenStream {
    pub fn new(
        chunks: mpsc::Receiver<Result<String, LlmError>>,
        handle: Option<JoinHandle<()>>,
    ) -> Self {
        Self { chunks, handle }
    }

    /// Abort the producing task. Safe to call more than once.
    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for TokenStream {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Contract for the language-model collaborator.
#[async_trait::async_trait]
pub trait LanguageModel: Send + Sync {
    /// Start streaming a reply for `turn`, given the prior conversation and an
    /// optional lesson/document context string.
    async fn stream_reply(
        &self,
        history: &[ChatMessage],
        turn: &str,
        context: Option<&str>,
    ) -> Result<TokenStream, LlmError>;
}
