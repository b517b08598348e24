//! Message and snapshot types shared by the store and its readers.

use serde::{Deserialize, Serialize, Serializer};
use std::ops::Deref;
use std::sync::Arc;

/// Author of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    /// Lowercase wire name, as used by chat templates.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single conversation message.
///
/// `content` only ever holds visible text. Reasoning extracted from
/// `<think>` blocks lives in `thought`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought: Option<String>,
    /// False while the message is still receiving streamed deltas.
    pub is_final: bool,
}

impl Message {
    /// A finalized system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::finalized(Role::System, content)
    }

    /// A finalized user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::finalized(Role::User, content)
    }

    /// A finalized assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::finalized(Role::Assistant, content)
    }

    /// An empty assistant message that will receive streamed deltas.
    pub fn open_assistant() -> Self {
        Self {
            role: Role::Assistant,
            content: String::new(),
            thought: None,
            is_final: false,
        }
    }

    fn finalized(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            thought: None,
            is_final: true,
        }
    }

    /// Whether this message may still be amended.
    pub fn is_open(&self) -> bool {
        !self.is_final
    }
}

/// Immutable view of the conversation at one instant.
///
/// Cloning is a reference-count bump, so snapshots can be handed to any
/// number of readers (display, TTS) without locking the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationSnapshot(Arc<[Message]>);

impl ConversationSnapshot {
    pub(crate) fn new(messages: &[Message]) -> Self {
        Self(Arc::from(messages))
    }

    /// Messages after the system prompt, in chronological order.
    pub fn visible(&self) -> &[Message] {
        match self.0.first() {
            Some(first) if first.role == Role::System => &self.0[1..],
            _ => &self.0,
        }
    }

    /// The most recent message.
    pub fn last(&self) -> Option<&Message> {
        self.0.last()
    }
}

impl Serialize for ConversationSnapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (*self.0).serialize(serializer)
    }
}

impl Deref for ConversationSnapshot {
    type Target = [Message];

    fn deref(&self) -> &[Message] {
        &self.0
    }
}
