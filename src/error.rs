//! Error types for the turn-taking core.

use crate::conversation::StoreError;

/// Top-level error type for a conversation session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Speech recognition collaborator error.
    #[error("recognition error: {0}")]
    Recognition(String),

    /// Inference collaborator error.
    #[error("generation error: {0}")]
    Generation(String),

    /// Speech synthesis collaborator error.
    #[error("synthesis error: {0}")]
    Synthesis(String),

    /// The model context was invalidated; the session must be reset.
    #[error("model context lost: {0}")]
    ContextLost(String),

    /// Conversation store rejected a mutation.
    #[error("conversation store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),
}

impl SessionError {
    /// Whether the session can continue after this error without a full reset.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::ContextLost(_))
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, SessionError>;
