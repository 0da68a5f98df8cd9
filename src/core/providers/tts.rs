//! Speech-synthesis collaborator contract.

use bytes::Bytes;

/// Error types for synthesis.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TtsError {
    #[error("synthesis connection failed: {0}")]
    ConnectionFailed(String),
    #[error("synthesis provider error: {0}")]
    ProviderError(String),
    #[error("empty synthesis input")]
    EmptyInput,
}

/// Contract for the speech-synthesis collaborator.
///
/// One call per sentence. Cancellation is structural: the response task that
/// awaits this call is aborted on interrupt, which drops the future and the
/// underlying request mid-flight.
#[async_trait::async_trait]
pub trait SpeechSynth: Send + Sync {
    /// Synthesize one sentence of text to encoded audio bytes.
    async fn synthesize(&self, text: &str) -> Result<Bytes, TtsError>;
}
