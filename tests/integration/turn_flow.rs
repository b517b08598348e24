//! Complete turns from submission to the end of playback.

use crate::helpers::{
    completed, drain, finish_playback, send, session, silent_session, start_text_turn,
    stream_reply, token, with_events,
};
use parley::conversation::{Message, Role};
use parley::pipeline::messages::{SynthesisEvent, TurnState};
use parley::runtime::RuntimeEvent;
use parley::test_utils::CollaboratorCall;
use uuid::Uuid;

#[tokio::test]
async fn split_reasoning_markers_are_classified() {
    let mut s = session();
    let id = start_text_turn(&mut s, "hi").await;

    let state = stream_reply(&mut s, id, &["<thi", "nk>reasoning</th", "ink>Hello ", " world"]).await;
    assert_eq!(state, TurnState::Speaking);

    let snapshot = s.controller.snapshot();
    let reply = snapshot.last().unwrap();
    assert_eq!(reply.role, Role::Assistant);
    assert_eq!(reply.content, "Hello  world");
    assert_eq!(reply.thought.as_deref(), Some("reasoning"));
    assert!(reply.is_final);

    let calls = s.log.calls();
    let CollaboratorCall::Speak(request) = calls.last().unwrap() else {
        panic!("expected a speak call, got {calls:?}");
    };
    assert_eq!(request.text, "Hello  world");
    assert_eq!(request.language, "en-US");
    assert!((request.rate - 0.5).abs() < f32::EPSILON);

    assert_eq!(s.controller.active_utterance_id(), Some(request.id));
    let started = SynthesisEvent::Started {
        utterance_id: request.id,
    };
    assert_eq!(send(&mut s, started).await, TurnState::Speaking);
    assert_eq!(finish_playback(&mut s).await, TurnState::Idle);
    assert_eq!(s.controller.active_utterance_id(), None);
}

#[tokio::test]
async fn reasoning_in_the_middle_of_the_reply() {
    let mut s = silent_session();
    let id = start_text_turn(&mut s, "hi").await;
    stream_reply(&mut s, id, &["Hel", "lo <th", "ink>rea", "soning</think> world"]).await;

    let snapshot = s.controller.snapshot();
    let reply = snapshot.last().unwrap();
    assert_eq!(reply.content, "Hello  world");
    assert_eq!(reply.thought.as_deref(), Some("reasoning"));
}

#[tokio::test]
async fn history_sent_to_the_engine_excludes_the_open_reply() {
    let mut s = silent_session();
    let first = start_text_turn(&mut s, "one").await;
    stream_reply(&mut s, first, &["uno"]).await;
    start_text_turn(&mut s, "two").await;

    let request = s.engine.last_request().unwrap();
    let roles: Vec<Role> = request.messages.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        [Role::System, Role::User, Role::Assistant, Role::User]
    );
    assert!(request.messages.iter().all(|m| m.is_final));
    assert_eq!(request.messages.last().unwrap().content, "two");
    // The store already holds the open reply.
    assert!(s.controller.store().is_open());
}

#[tokio::test]
async fn conversation_shape_after_two_turns() {
    let mut s = silent_session();
    for text in ["first", "second"] {
        let id = start_text_turn(&mut s, text).await;
        assert_eq!(stream_reply(&mut s, id, &["ok"]).await, TurnState::Idle);
    }

    let snapshot = s.controller.snapshot();
    assert_eq!(snapshot.len(), 5);
    assert_eq!(snapshot[0].role, Role::System);
    assert_eq!(snapshot.visible().len(), 4);
    assert!(snapshot.iter().all(|m| m.is_final));
    assert_eq!(snapshot[3], Message::user("second"));
}

#[tokio::test]
async fn empty_reply_skips_speech() {
    let mut s = session();
    let id = start_text_turn(&mut s, "hi").await;

    let state = stream_reply(&mut s, id, &["<think>just thinking</think>", "  \n"]).await;
    assert_eq!(state, TurnState::Idle);
    assert!(!s.log.calls().iter().any(|c| matches!(c, CollaboratorCall::Speak(_))));
    assert_eq!(
        s.controller.snapshot().last().unwrap().thought.as_deref(),
        Some("just thinking")
    );
}

#[tokio::test]
async fn empty_reasoning_block_is_not_stored() {
    let mut s = silent_session();
    let id = start_text_turn(&mut s, "hi").await;
    stream_reply(&mut s, id, &["<think></think>", "Hey"]).await;

    let snapshot = s.controller.snapshot();
    let reply = snapshot.last().unwrap();
    assert_eq!(reply.content, "Hey");
    assert_eq!(reply.thought, None);
}

#[tokio::test]
async fn unclosed_reasoning_is_kept_as_thought() {
    let mut s = silent_session();
    let id = start_text_turn(&mut s, "hi").await;
    stream_reply(&mut s, id, &["<think>never ", "finished"]).await;

    let snapshot = s.controller.snapshot();
    let reply = snapshot.last().unwrap();
    assert_eq!(reply.content, "");
    assert_eq!(reply.thought.as_deref(), Some("never finished"));
    assert!(reply.is_final);
}

#[tokio::test]
async fn speech_output_toggle_applies_to_later_turns() {
    let mut s = session();
    assert!(s.controller.speech_output_enabled());
    send(&mut s, parley::UserCommand::SetSpeechOutput(false)).await;
    assert!(!s.controller.speech_output_enabled());

    let id = start_text_turn(&mut s, "hi").await;
    assert_eq!(stream_reply(&mut s, id, &["hello"]).await, TurnState::Idle);
    assert!(!s.log.calls().iter().any(|c| matches!(c, CollaboratorCall::Speak(_))));
}

#[tokio::test]
async fn failed_speak_returns_to_idle_with_reply_kept() {
    let mut s = session();
    s.synthesizer.fail_speak(true);
    let id = start_text_turn(&mut s, "hi").await;

    assert_eq!(stream_reply(&mut s, id, &["hello"]).await, TurnState::Idle);
    let snapshot = s.controller.snapshot();
    assert_eq!(snapshot.last().unwrap().content, "hello");
    assert!(snapshot.last().unwrap().is_final);
}

#[tokio::test]
async fn synthesis_cancel_and_error_end_the_turn() {
    let endings: [fn(Uuid) -> SynthesisEvent; 2] = [
        |utterance_id| SynthesisEvent::Cancelled { utterance_id },
        |utterance_id| SynthesisEvent::Error {
            utterance_id,
            message: "audio".into(),
        },
    ];
    for ending in endings {
        let mut s = session();
        let id = start_text_turn(&mut s, "hi").await;
        assert_eq!(stream_reply(&mut s, id, &["hello"]).await, TurnState::Speaking);
        let utterance_id = s.controller.active_utterance_id().unwrap();
        assert_eq!(send(&mut s, ending(utterance_id)).await, TurnState::Idle);
    }
}

#[tokio::test]
async fn synthesis_events_outside_speaking_are_ignored() {
    let mut s = session();
    let stray = SynthesisEvent::Finished {
        utterance_id: Uuid::new_v4(),
    };
    assert_eq!(send(&mut s, stray.clone()).await, TurnState::Idle);
    let id = start_text_turn(&mut s, "hi").await;
    assert_eq!(send(&mut s, stray).await, TurnState::Generating);
    send(&mut s, token(id, "still here")).await;
    assert_eq!(s.controller.snapshot().last().unwrap().content, "still here");
    send(&mut s, completed(id)).await;
}

#[tokio::test]
async fn runtime_events_follow_the_turn() {
    let (mut s, mut rx) = with_events(silent_session());
    let id = start_text_turn(&mut s, "hi").await;
    stream_reply(&mut s, id, &["<think>r</think>", "Hel", "lo"]).await;

    let events = drain(&mut rx);
    assert_eq!(
        events.first(),
        Some(&RuntimeEvent::StateChanged {
            from: TurnState::Idle,
            to: TurnState::Generating
        })
    );
    assert!(events.contains(&RuntimeEvent::ThoughtCompleted("r".into())));
    let deltas: String = events
        .iter()
        .filter_map(|e| match e {
            RuntimeEvent::AssistantDelta(text) => Some(text.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(deltas, "Hello");

    let stats = events.iter().find_map(|e| match e {
        RuntimeEvent::GenerationFinished(stats) => Some(*stats),
        _ => None,
    });
    let stats = stats.expect("generation stats");
    assert_eq!(stats.request_id, id);
    assert_eq!(stats.token_count, 3);
    assert_eq!(
        events.last(),
        Some(&RuntimeEvent::StateChanged {
            from: TurnState::Generating,
            to: TurnState::Idle
        })
    );
}

#[tokio::test]
async fn snapshots_are_published_while_streaming() {
    let mut s = silent_session();
    let mut conversation = s.controller.subscribe_conversation();
    let mut state = s.controller.subscribe_state();

    let id = start_text_turn(&mut s, "hi").await;
    assert_eq!(*state.borrow_and_update(), TurnState::Generating);

    send(&mut s, token(id, "partial")).await;
    {
        let snapshot = conversation.borrow_and_update();
        let reply = snapshot.last().unwrap();
        assert!(!reply.is_final);
        assert_eq!(reply.content, "partial");
    }

    send(&mut s, completed(id)).await;
    assert!(conversation.borrow_and_update().last().unwrap().is_final);
    assert_eq!(*state.borrow_and_update(), TurnState::Idle);
}

#[tokio::test]
async fn late_cancel_of_a_stopped_utterance_does_not_end_the_next_one() {
    let mut s = session();
    let first = start_text_turn(&mut s, "first").await;
    stream_reply(&mut s, first, &["one"]).await;
    let stopped = s.controller.active_utterance_id().unwrap();
    assert_eq!(send(&mut s, parley::UserCommand::StopSpeaking).await, TurnState::Idle);

    let second = start_text_turn(&mut s, "second").await;
    assert_eq!(stream_reply(&mut s, second, &["two"]).await, TurnState::Speaking);
    let playing = s.controller.active_utterance_id().unwrap();
    assert_ne!(stopped, playing);

    let late = SynthesisEvent::Cancelled {
        utterance_id: stopped,
    };
    assert_eq!(send(&mut s, late).await, TurnState::Speaking);
    // The mic stays closed while the second reply is still playing.
    assert_eq!(send(&mut s, parley::UserCommand::ActivateMic).await, TurnState::Speaking);
    assert!(!s.log.calls().contains(&CollaboratorCall::RecognizerStart {
        locale: "en-US".into()
    }));

    assert_eq!(finish_playback(&mut s).await, TurnState::Idle);
}
