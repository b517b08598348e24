//! Speech recognition collaborator boundary.
//!
//! Recognizers report `Started`, partial and final results, `Ended` and
//! errors as [`RecognitionEvent`](crate::pipeline::messages::RecognitionEvent)s
//! through the session's event sink.

use crate::error::Result;
use async_trait::async_trait;

/// Microphone speech-to-text engine.
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    /// Begin listening in the given locale (e.g. `en-US`).
    async fn start(&self, locale: &str) -> Result<()>;

    /// Stop listening. Pending audio is finalized into a last result.
    async fn stop(&self) -> Result<()>;
}
