//! Mock recognition provider.
//!
//! Accepts audio and never emits anything. Used for text-only deployments
//! and for driving sessions in tests, where recognition events are injected
//! directly instead of coming from a vendor stream.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bytes::Bytes;

use super::base::{BaseStt, SpeechEventCallback, SttError, SttErrorCallback};
use crate::utils::epoch_ms;

#[derive(Default)]
pub struct MockStt {
    ready: AtomicBool,
    last_message_ms: AtomicU64,
}

impl MockStt {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl BaseStt for MockStt {
    async fn connect(&mut self) -> Result<(), SttError> {
        self.ready.store(true, Ordering::SeqCst);
        self.last_message_ms.store(epoch_ms(), Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), SttError> {
        self.ready.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn send_audio(&mut self, _frame: Bytes) -> Result<(), SttError> {
        // Keep the dead-man timer quiet; the mock never stalls.
        self.last_message_ms.store(epoch_ms(), Ordering::SeqCst);
        Ok(())
    }

    fn on_event(&mut self, _callback: SpeechEventCallback) {}

    fn on_error(&mut self, _callback: SttErrorCallback) {}

    fn last_message_ms(&self) -> u64 {
        self.last_message_ms.load(Ordering::SeqCst)
    }

    fn provider_info(&self) -> &'static str {
        "mock"
    }
}
