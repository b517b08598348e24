//! Speech synthesis collaborator boundary.

use crate::config::SynthesisConfig;
use crate::error::Result;
use async_trait::async_trait;
use uuid::Uuid;

/// Text to speak plus the voice settings to speak it with.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeakRequest {
    /// Tags every synthesis event of this utterance.
    pub id: Uuid,
    pub text: String,
    pub language: String,
    pub rate: f32,
    pub pitch: f32,
    pub voice: Option<String>,
}

impl SpeakRequest {
    pub fn new(text: impl Into<String>, config: &SynthesisConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
            language: config.language.clone(),
            rate: config.rate,
            pitch: config.pitch,
            voice: config.voice.clone(),
        }
    }
}

/// Text-to-speech engine.
///
/// Playback progress is reported as
/// [`SynthesisEvent`](crate::pipeline::messages::SynthesisEvent)s.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Start speaking. Returns once playback has been queued.
    async fn speak(&self, request: SpeakRequest) -> Result<()>;

    /// Cancel the current utterance.
    async fn stop(&self) -> Result<()>;
}
