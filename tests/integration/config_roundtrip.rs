//! Configuration files feeding a live session.

use crate::helpers::send;
use parley::SessionConfig;
use parley::config::PromptFormat;
use parley::pipeline::messages::{TurnState, UserCommand};
use parley::test_utils::{CollaboratorCall, MockSession};

#[test]
fn partial_file_keeps_defaults_elsewhere() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
[conversation]
system_prompt = "You are terse."
auto_listen = true

[generation]
prompt_format = "chatml"
max_history_messages = 6

[synthesis]
voice = "en-gb-female"
"#,
    )
    .unwrap();

    let config = SessionConfig::load_or_default(&path).unwrap();
    assert_eq!(config.conversation.system_prompt, "You are terse.");
    assert!(config.conversation.auto_listen);
    assert_eq!(config.generation.prompt_format, PromptFormat::ChatMl);
    assert_eq!(config.generation.max_history_messages, 6);
    assert_eq!(config.generation.max_tokens, 400);
    assert_eq!(config.synthesis.voice.as_deref(), Some("en-gb-female"));
    assert!((config.synthesis.rate - 0.5).abs() < f32::EPSILON);
    assert_eq!(config.recognition.locale, "en-US");
}

#[test]
fn invalid_file_is_rejected() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[generation]\ntop_p = 3.0\n").unwrap();
    assert!(SessionConfig::load_or_default(&path).is_err());
}

#[tokio::test]
async fn saved_settings_reach_the_collaborators() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("nested").join("config.toml");

    let mut config = SessionConfig::default();
    config.conversation.system_prompt = "Answer in French.".into();
    config.generation.prompt_format = PromptFormat::ChatMl;
    config.recognition.locale = "fr-FR".into();
    config.save_to_file(&path).unwrap();

    let loaded = SessionConfig::load_or_default(&path).unwrap();
    let mut s = MockSession::new(loaded);

    send(&mut s, UserCommand::ActivateMic).await;
    assert_eq!(
        s.log.calls().first(),
        Some(&CollaboratorCall::RecognizerStart {
            locale: "fr-FR".into()
        })
    );
    send(&mut s, UserCommand::DeactivateMic).await;
    let state = send(
        &mut s,
        parley::pipeline::messages::RecognitionEvent::FinalResult("bonjour".into()),
    )
    .await;
    assert_eq!(state, TurnState::Generating);

    let request = s.engine.last_request().unwrap();
    assert_eq!(request.messages[0].content, "Answer in French.");
    let prompt = request.prompt.unwrap();
    assert!(prompt.starts_with("<|im_start|>system\nAnswer in French.<|im_end|>"));
    assert!(prompt.contains("<|im_start|>user\nbonjour<|im_end|>"));
}

#[test]
fn missing_file_falls_back_to_defaults() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let config = SessionConfig::load_or_default(&dir.path().join("absent.toml")).unwrap();
    assert_eq!(config.generation, SessionConfig::default().generation);
}
