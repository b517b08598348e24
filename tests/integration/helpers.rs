//! Shared helpers for integration tests.

use parley::SessionConfig;
use parley::pipeline::messages::{
    GenerationEvent, SessionEvent, SynthesisEvent, TurnState, UserCommand,
};
use parley::runtime::RuntimeEvent;
use parley::test_utils::MockSession;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Mock session with default configuration.
pub(crate) fn session() -> MockSession {
    MockSession::new(SessionConfig::default())
}

/// Mock session with speech output disabled, so completed turns end in `Idle`.
pub(crate) fn silent_session() -> MockSession {
    let mut config = SessionConfig::default();
    config.synthesis.enabled = false;
    MockSession::new(config)
}

/// Attach a runtime event receiver to the session's controller.
pub(crate) fn with_events(session: MockSession) -> (MockSession, broadcast::Receiver<RuntimeEvent>) {
    let (tx, rx) = broadcast::channel(256);
    (session.with_runtime_events(tx), rx)
}

/// Feed one event into the controller.
pub(crate) async fn send(session: &mut MockSession, event: impl Into<SessionEvent>) -> TurnState {
    session.controller.handle(event.into()).await
}

/// Submit typed text and return the id of the generation it opened.
pub(crate) async fn start_text_turn(session: &mut MockSession, text: &str) -> Uuid {
    let state = send(session, UserCommand::SubmitText(text.to_owned())).await;
    assert_eq!(state, TurnState::Generating);
    session.last_request_id().expect("generation request")
}

pub(crate) fn token(request_id: Uuid, text: &str) -> GenerationEvent {
    GenerationEvent::Token {
        request_id,
        text: text.to_owned(),
    }
}

pub(crate) fn completed(request_id: Uuid) -> GenerationEvent {
    GenerationEvent::Completed {
        request_id,
        timings: None,
    }
}

/// Playback of the utterance the controller is currently speaking ended.
pub(crate) async fn finish_playback(session: &mut MockSession) -> TurnState {
    let utterance_id = session
        .controller
        .active_utterance_id()
        .expect("an utterance is playing");
    send(session, SynthesisEvent::Finished { utterance_id }).await
}

/// Stream fragments for `request_id` and complete the generation.
pub(crate) async fn stream_reply(session: &mut MockSession, request_id: Uuid, fragments: &[&str]) -> TurnState {
    for fragment in fragments {
        send(session, token(request_id, fragment)).await;
    }
    send(session, completed(request_id)).await
}

/// Drain every runtime event received so far.
pub(crate) fn drain(rx: &mut broadcast::Receiver<RuntimeEvent>) -> Vec<RuntimeEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
