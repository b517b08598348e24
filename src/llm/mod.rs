//! Inference collaborator boundary.
//!
//! The engine itself (model loading, sampling, decoding) lives outside this
//! crate. The controller only opens [`GenerationRequest`]s and consumes the
//! token events the engine reports back through its
//! [`EventSink`](crate::pipeline::messages::EventSink).

pub mod prompt;

use crate::config::{GenerationConfig, PromptFormat};
use crate::conversation::Message;
use crate::error::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// One streaming generation.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Tags every token event of this generation.
    pub id: Uuid,
    /// Finalized history, system prompt first, newest user message last.
    pub messages: Vec<Message>,
    /// Pre-rendered prompt when [`PromptFormat::ChatMl`] is configured.
    pub prompt: Option<String>,
    pub config: GenerationConfig,
    /// Cancelled when the user stops the generation. Engines must stop
    /// delivering tokens once this fires.
    pub cancel: CancellationToken,
}

impl GenerationRequest {
    /// Build a request from the conversation history.
    pub fn new(history: &[Message], config: &GenerationConfig) -> Self {
        let messages = prompt::trim_history(history, config.max_history_messages);
        let prompt = match config.prompt_format {
            PromptFormat::Messages => None,
            PromptFormat::ChatMl => Some(prompt::format_chatml(&messages)),
        };
        Self {
            id: Uuid::new_v4(),
            messages,
            prompt,
            config: config.clone(),
            cancel: CancellationToken::new(),
        }
    }
}

/// Streaming text generation.
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    /// Accept a request and start streaming.
    ///
    /// Returns once the request is accepted; tokens, completion and failure
    /// arrive later as generation events carrying `request.id`.
    async fn generate(&self, request: GenerationRequest) -> Result<()>;
}

/// Readiness of the loaded model context.
pub trait ContextProvider: Send + Sync {
    fn is_ready(&self) -> bool;
}
