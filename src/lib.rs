//! Parley: turn-taking control core for on-device voice chat assistants.
//!
//! The crate decides who holds the conversational turn (the user speaking,
//! the model generating, the assistant speaking) and keeps the transcript
//! consistent while streamed model output arrives:
//! Mic → STT → Conversation → LLM → Classifier → Conversation → TTS
//!
//! # Architecture
//!
//! - **Conversation store**: ordered messages with one open assistant reply
//! - **Response classifier**: splits streamed text into reasoning and visible reply
//! - **Turn controller**: state machine owning the store and all collaborators
//! - **Gate policy**: pure predicates deciding which user actions are enabled
//! - **Coordinator**: single-consumer event loop feeding the controller
//!
//! Speech recognition, inference and speech synthesis are collaborators
//! behind the [`SpeechRecognizer`], [`InferenceEngine`] and
//! [`SpeechSynthesizer`] traits. They report back through an [`EventSink`].

pub mod config;
pub mod conversation;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod runtime;
pub mod stt;
pub mod tts;

#[doc(hidden)]
pub mod test_utils;

pub use config::SessionConfig;
pub use conversation::{ConversationSnapshot, ConversationStore, Message, Role, StoreError};
pub use error::{Result, SessionError};
pub use llm::{ContextProvider, GenerationRequest, InferenceEngine};
pub use pipeline::classifier::ResponseClassifier;
pub use pipeline::controller::{Collaborators, TurnController};
pub use pipeline::coordinator::{SessionCoordinator, session_channel};
pub use pipeline::messages::{EventSink, SessionEvent, TurnState, UserCommand};
pub use runtime::RuntimeEvent;
pub use stt::SpeechRecognizer;
pub use tts::{SpeakRequest, SpeechSynthesizer};
