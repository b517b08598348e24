//! Append-only conversation history.
//!
//! The store is the only shared mutable resource of a session. It has a
//! single writer (the turn controller) and hands out immutable
//! [`ConversationSnapshot`]s to readers.
//!
//! # Invariants
//!
//! - The first message is always the single `system` message.
//! - Only the last message may be open (`is_final == false`).
//! - A finalized message is never modified again.
//! - `thought` is set at most once per assistant message.

mod types;

pub use types::{ConversationSnapshot, Message, Role};

use tracing::warn;

/// Rejected store mutations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The mutation is not allowed given the current last message.
    #[error("invalid conversation state: {0}")]
    InvalidState(String),

    /// A delta or finalization arrived with no open assistant message.
    #[error("no open assistant message")]
    NoOpenMessage,

    /// The open message already carries a thought.
    #[error("thought already set on the open message")]
    DuplicateThought,
}

/// Ordered message history of one conversation session.
#[derive(Debug, Clone)]
pub struct ConversationStore {
    messages: Vec<Message>,
}

impl ConversationStore {
    /// Create a conversation holding only `system_prompt`.
    pub fn new(system_prompt: &str) -> Self {
        Self {
            messages: vec![Message::system(system_prompt)],
        }
    }

    /// Append a message, or fold a continuation into the open message.
    ///
    /// A continuation is a message with the same role as the open message.
    /// Its content is concatenated onto the open message, its thought goes
    /// through [`set_thought`](Self::set_thought) rules, and if it is final
    /// the open message is finalized.
    ///
    /// # Errors
    ///
    /// `InvalidState` when a system message is appended, or when the last
    /// message is open and `message` is not a continuation of it.
    pub fn append(&mut self, message: Message) -> Result<(), StoreError> {
        if message.role == Role::System {
            return Err(self.reject(StoreError::InvalidState(
                "the system message is only set on creation or reset".to_owned(),
            )));
        }

        let Some(open) = self.open_message_mut() else {
            self.messages.push(message);
            return Ok(());
        };

        if open.role != message.role {
            let err = StoreError::InvalidState(format!(
                "cannot append a {} message while a {} message is open",
                message.role, open.role
            ));
            return Err(self.reject(err));
        }

        open.content.push_str(&message.content);
        let duplicate = match (message.thought, open.thought.is_some()) {
            (Some(_), true) => true,
            (Some(thought), false) => {
                open.thought = Some(thought);
                false
            }
            (None, _) => false,
        };
        if message.is_final {
            open.is_final = true;
        }
        if duplicate {
            return Err(self.reject(StoreError::DuplicateThought));
        }
        Ok(())
    }

    /// Append an empty, open assistant message.
    ///
    /// # Errors
    ///
    /// `InvalidState` if the last message is already open.
    pub fn begin_assistant_turn(&mut self) -> Result<(), StoreError> {
        if self.is_open() {
            return Err(self.reject(StoreError::InvalidState(
                "an assistant turn is already open".to_owned(),
            )));
        }
        self.messages.push(Message::open_assistant());
        Ok(())
    }

    /// Concatenate visible text onto the open assistant message.
    ///
    /// # Errors
    ///
    /// `NoOpenMessage` if no assistant message is open.
    pub fn apply_visible_delta(&mut self, text: &str) -> Result<(), StoreError> {
        match self.open_assistant_mut() {
            Some(open) => {
                open.content.push_str(text);
                Ok(())
            }
            None => Err(self.reject(StoreError::NoOpenMessage)),
        }
    }

    /// Attach the completed reasoning block to the open assistant message.
    ///
    /// # Errors
    ///
    /// `NoOpenMessage` if no assistant message is open, `DuplicateThought`
    /// if a thought was already set (the first value is kept).
    pub fn set_thought(&mut self, text: &str) -> Result<(), StoreError> {
        let result = match self.open_assistant_mut() {
            None => Err(StoreError::NoOpenMessage),
            Some(open) if open.thought.is_some() => Err(StoreError::DuplicateThought),
            Some(open) => {
                open.thought = Some(text.to_owned());
                Ok(())
            }
        };
        result.map_err(|err| self.reject(err))
    }

    /// Mark the open assistant message final.
    ///
    /// # Errors
    ///
    /// `NoOpenMessage` if no assistant message is open.
    pub fn finalize_assistant_turn(&mut self) -> Result<(), StoreError> {
        match self.open_assistant_mut() {
            Some(open) => {
                open.is_final = true;
                Ok(())
            }
            None => Err(self.reject(StoreError::NoOpenMessage)),
        }
    }

    /// Replace the whole conversation with a single system message.
    pub fn reset(&mut self, system_prompt: &str) {
        self.messages.clear();
        self.messages.push(Message::system(system_prompt));
    }

    /// Immutable copy of the full sequence.
    pub fn snapshot(&self) -> ConversationSnapshot {
        ConversationSnapshot::new(&self.messages)
    }

    /// Every message except a trailing open one.
    pub fn finalized_history(&self) -> &[Message] {
        match self.messages.last() {
            Some(last) if last.is_open() => &self.messages[..self.messages.len() - 1],
            _ => &self.messages,
        }
    }

    /// The open message, if the last message is still receiving deltas.
    pub fn open_message(&self) -> Option<&Message> {
        self.messages.last().filter(|m| m.is_open())
    }

    /// Whether the last message is open.
    pub fn is_open(&self) -> bool {
        self.open_message().is_some()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    fn open_message_mut(&mut self) -> Option<&mut Message> {
        self.messages.last_mut().filter(|m| m.is_open())
    }

    fn open_assistant_mut(&mut self) -> Option<&mut Message> {
        self.open_message_mut()
            .filter(|m| m.role == Role::Assistant)
    }

    fn reject(&self, err: StoreError) -> StoreError {
        warn!(messages = self.messages.len(), "conversation store rejected mutation: {err}");
        err
    }
}
