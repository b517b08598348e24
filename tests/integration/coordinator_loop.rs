//! The event loop driving a controller with a streaming engine.

use parley::SessionConfig;
use parley::pipeline::coordinator::{SessionCoordinator, session_channel};
use parley::pipeline::messages::{SynthesisEvent, TurnState, UserCommand};
use parley::test_utils::{CallLog, MockEngine, MockSession};
use std::time::Duration;
use tokio::sync::watch;

async fn wait_for(state: &mut watch::Receiver<TurnState>, target: TurnState) {
    tokio::time::timeout(Duration::from_secs(5), state.wait_for(|s| *s == target))
        .await
        .expect("timed out waiting for state")
        .expect("state channel closed");
}

#[tokio::test]
async fn streamed_turn_runs_through_the_event_loop() {
    let (sink, events) = session_channel();
    let log = CallLog::default();
    let engine = MockEngine::new(log.clone()).with_script(
        sink.clone(),
        &["<th", "ink>", "plan", "</think>", "Sure", ", done."],
    );
    let session = MockSession::with_engine(SessionConfig::default(), log.clone(), engine);
    let mut state = session.controller.subscribe_state();
    let conversation = session.controller.subscribe_conversation();

    let coordinator = SessionCoordinator::new(session.controller, events);
    let cancel = coordinator.cancel_token();
    let handle = tokio::spawn(coordinator.run());

    sink.send(UserCommand::SubmitText("do it".into())).unwrap();
    wait_for(&mut state, TurnState::Speaking).await;
    let utterance_id = log.last_utterance_id().expect("reply was spoken");
    sink.send(SynthesisEvent::Finished { utterance_id }).unwrap();
    wait_for(&mut state, TurnState::Idle).await;

    {
        let snapshot = conversation.borrow();
        let reply = snapshot.last().unwrap();
        assert_eq!(reply.content, "Sure, done.");
        assert_eq!(reply.thought.as_deref(), Some("plan"));
        assert!(reply.is_final);
    }

    cancel.cancel();
    let controller = handle.await.unwrap();
    assert_eq!(controller.state(), TurnState::Idle);
    assert_eq!(controller.snapshot().len(), 3);
}

#[tokio::test]
async fn cancelling_the_loop_stops_active_collaborators() {
    let (sink, events) = session_channel();
    let session = MockSession::new(SessionConfig::default());
    let mut state = session.controller.subscribe_state();
    let engine = session.engine.clone();

    let coordinator = SessionCoordinator::new(session.controller, events);
    let cancel = coordinator.cancel_token();
    let handle = tokio::spawn(coordinator.run());

    sink.send(UserCommand::SubmitText("long answer please".into())).unwrap();
    wait_for(&mut state, TurnState::Generating).await;

    cancel.cancel();
    handle.await.unwrap();
    assert!(engine.last_request().unwrap().cancel.is_cancelled());
}

#[tokio::test]
async fn loop_ends_when_every_sink_is_dropped() {
    let (sink, events) = session_channel();
    let session = MockSession::new(SessionConfig::default());
    let coordinator = SessionCoordinator::new(session.controller, events);

    drop(sink);
    let controller = tokio::time::timeout(Duration::from_secs(5), coordinator.run())
        .await
        .expect("loop should stop on its own");
    assert_eq!(controller.state(), TurnState::Idle);
}
