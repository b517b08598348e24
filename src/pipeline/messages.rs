//! Typed events flowing into the turn controller.
//!
//! Every collaborator callback and user action becomes one [`SessionEvent`]
//! pushed into a single channel, so the controller always works on its own
//! current state instead of state captured by a callback.

use crate::error::{Result, SessionError};
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Which actor currently holds the turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TurnState {
    #[default]
    Idle,
    Listening,
    Generating,
    Speaking,
    /// Generation was interrupted or the model context was lost; waits for an
    /// explicit acknowledgement.
    Faulted,
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Listening => "listening",
            Self::Generating => "generating",
            Self::Speaking => "speaking",
            Self::Faulted => "faulted",
        };
        f.write_str(name)
    }
}

/// Actions requested by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserCommand {
    /// Mic button pressed while idle.
    ActivateMic,
    /// Mic button pressed again while listening.
    DeactivateMic,
    /// Typed text submitted.
    SubmitText(String),
    StopGeneration,
    StopSpeaking,
    /// Leave `Faulted`.
    Acknowledge,
    /// Back out to model selection: drop the conversation and return to idle.
    Reset,
    /// Enable or disable spoken replies for later turns.
    SetSpeechOutput(bool),
}

/// Events from the speech-recognition collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionEvent {
    Started,
    PartialResult(String),
    FinalResult(String),
    Ended,
    Error(String),
}

/// Throughput reported by an inference engine, if it measures its own.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationTimings {
    pub predicted_per_second: f64,
}

/// Events from the inference collaborator, tagged with the request id.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationEvent {
    Token {
        request_id: Uuid,
        text: String,
    },
    Completed {
        request_id: Uuid,
        timings: Option<GenerationTimings>,
    },
    Failed {
        request_id: Uuid,
        message: String,
    },
}

impl GenerationEvent {
    pub fn request_id(&self) -> Uuid {
        match self {
            Self::Token { request_id, .. }
            | Self::Completed { request_id, .. }
            | Self::Failed { request_id, .. } => *request_id,
        }
    }
}

/// Events from the speech-synthesis collaborator, tagged with the utterance id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SynthesisEvent {
    Started { utterance_id: Uuid },
    Finished { utterance_id: Uuid },
    Cancelled { utterance_id: Uuid },
    Error { utterance_id: Uuid, message: String },
}

impl SynthesisEvent {
    pub fn utterance_id(&self) -> Uuid {
        match self {
            Self::Started { utterance_id }
            | Self::Finished { utterance_id }
            | Self::Cancelled { utterance_id }
            | Self::Error { utterance_id, .. } => *utterance_id,
        }
    }
}

/// Model context notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextEvent {
    Ready,
    Lost { reason: String },
}

/// Single entry point of the turn controller.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    User(UserCommand),
    Recognition(RecognitionEvent),
    Generation(GenerationEvent),
    Synthesis(SynthesisEvent),
    Context(ContextEvent),
}

impl From<UserCommand> for SessionEvent {
    fn from(cmd: UserCommand) -> Self {
        Self::User(cmd)
    }
}

impl From<RecognitionEvent> for SessionEvent {
    fn from(ev: RecognitionEvent) -> Self {
        Self::Recognition(ev)
    }
}

impl From<GenerationEvent> for SessionEvent {
    fn from(ev: GenerationEvent) -> Self {
        Self::Generation(ev)
    }
}

impl From<SynthesisEvent> for SessionEvent {
    fn from(ev: SynthesisEvent) -> Self {
        Self::Synthesis(ev)
    }
}

impl From<ContextEvent> for SessionEvent {
    fn from(ev: ContextEvent) -> Self {
        Self::Context(ev)
    }
}

/// Clonable handle collaborators use to report back to the control loop.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl EventSink {
    pub fn new(tx: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self { tx }
    }

    /// Queue an event for the controller.
    ///
    /// # Errors
    ///
    /// Returns a channel error once the control loop has shut down.
    pub fn send(&self, event: impl Into<SessionEvent>) -> Result<()> {
        self.tx
            .send(event.into())
            .map_err(|_| SessionError::Channel("session event loop has stopped".to_owned()))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Throughput of one completed generation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationStats {
    pub request_id: Uuid,
    pub token_count: usize,
    pub elapsed: Duration,
    pub tokens_per_second: f64,
}
