//! Runtime events emitted by the turn controller for UI and observability.
//!
//! Kept lightweight so emitting never blocks the control loop. The full
//! conversation is published separately as a
//! [`ConversationSnapshot`](crate::conversation::ConversationSnapshot).

use crate::pipeline::messages::{GenerationStats, TurnState, UserCommand};

/// Events that describe what the session is doing "right now".
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeEvent {
    /// A turn transition was committed.
    StateChanged { from: TurnState, to: TurnState },
    /// Live (not yet final) recognizer transcript.
    PartialTranscript(String),
    /// Visible text appended to the assistant reply.
    AssistantDelta(String),
    /// The reply's reasoning block completed.
    ThoughtCompleted(String),
    /// A generation finished normally.
    GenerationFinished(GenerationStats),
    /// Human-readable notice about a recoverable problem.
    Notice(String),
    /// A user command was refused in the given state.
    ActionRejected { command: UserCommand, state: TurnState },
}
