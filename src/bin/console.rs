//! Interactive console driver for a parley session.
//!
//! Typed lines become text turns. Replies come from a built-in echo engine
//! that streams a reasoning block and then the reply, token by token, so the
//! whole turn-taking loop can be exercised without a model or audio devices.
//!
//! Commands: `/reset`, `/stop`, `/hush` (stop speaking), `/ack`,
//! `/speech on|off`, `/history` and `/quit`.
//! Diagnostics go to stderr; set `RUST_LOG=debug` for every transition.

use async_trait::async_trait;
use parley::llm::{ContextProvider, GenerationRequest, InferenceEngine};
use parley::pipeline::messages::{GenerationEvent, GenerationTimings, SynthesisEvent};
use parley::{
    Collaborators, EventSink, RuntimeEvent, SessionConfig, SessionCoordinator, SessionError,
    SpeakRequest, SpeechRecognizer, SpeechSynthesizer, TurnController, UserCommand,
    session_channel,
};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

const TOKEN_DELAY: Duration = Duration::from_millis(35);

/// Streams back a canned reply that quotes the user.
struct EchoEngine {
    sink: EventSink,
}

#[async_trait]
impl InferenceEngine for EchoEngine {
    async fn generate(&self, request: GenerationRequest) -> parley::Result<()> {
        let said = request
            .messages
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        let reply = format!(
            "<think>The user said \"{said}\". Repeat it back.</think>You said: {said}"
        );
        let sink = self.sink.clone();
        let id = request.id;
        let cancel = request.cancel;

        tokio::spawn(async move {
            let started = Instant::now();
            let mut tokens = 0usize;
            for token in split_tokens(&reply) {
                tokio::select! {
                    () = cancel.cancelled() => return,
                    () = tokio::time::sleep(TOKEN_DELAY) => {}
                }
                tokens += 1;
                if sink.send(GenerationEvent::Token { request_id: id, text: token }).is_err() {
                    return;
                }
            }
            let secs = started.elapsed().as_secs_f64();
            let timings = (secs > 0.0).then(|| GenerationTimings {
                predicted_per_second: tokens as f64 / secs,
            });
            let _ = sink.send(GenerationEvent::Completed {
                request_id: id,
                timings,
            });
        });
        Ok(())
    }
}

/// Cut text into 1-4 character fragments so tags get split mid-stream.
fn split_tokens(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(3)
        .enumerate()
        .flat_map(|(i, chunk)| {
            if i % 2 == 0 {
                vec![chunk.iter().collect::<String>()]
            } else {
                chunk.iter().map(char::to_string).collect()
            }
        })
        .collect()
}

/// The console has no microphone.
struct NoMicrophone;

#[async_trait]
impl SpeechRecognizer for NoMicrophone {
    async fn start(&self, _locale: &str) -> parley::Result<()> {
        Err(SessionError::Recognition(
            "the console driver has no microphone".to_owned(),
        ))
    }

    async fn stop(&self) -> parley::Result<()> {
        Ok(())
    }
}

/// "Speaks" by printing to stderr, then reports playback finished.
struct ConsoleVoice {
    sink: EventSink,
}

#[async_trait]
impl SpeechSynthesizer for ConsoleVoice {
    async fn speak(&self, request: SpeakRequest) -> parley::Result<()> {
        eprintln!("[speaking at rate {:.1}] {}", request.rate, request.text);
        let sink = self.sink.clone();
        let utterance_id = request.id;
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            let _ = sink.send(SynthesisEvent::Finished { utterance_id });
        });
        Ok(())
    }

    async fn stop(&self) -> parley::Result<()> {
        eprintln!("[speech stopped]");
        Ok(())
    }
}

struct AlwaysReady;

impl ContextProvider for AlwaysReady {
    fn is_ready(&self) -> bool {
        true
    }
}

fn config_path() -> PathBuf {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" || arg == "-c" {
            if let Some(path) = args.next() {
                return PathBuf::from(path);
            }
        }
    }
    SessionConfig::default_config_path()
}

fn print_event(event: RuntimeEvent) {
    match event {
        RuntimeEvent::AssistantDelta(text) => {
            print!("{text}");
            let _ = std::io::stdout().flush();
        }
        RuntimeEvent::ThoughtCompleted(thought) => println!("(thought: {thought})"),
        RuntimeEvent::GenerationFinished(stats) => println!(
            "\n[{} tokens, {:.1} tok/s]",
            stats.token_count, stats.tokens_per_second
        ),
        RuntimeEvent::Notice(message) => println!("\n! {message}"),
        RuntimeEvent::ActionRejected { command, state } => {
            println!("! {command:?} is not available while {state}");
        }
        RuntimeEvent::StateChanged { .. } | RuntimeEvent::PartialTranscript(_) => {}
    }
}

fn parse_command(line: &str) -> Option<UserCommand> {
    match line {
        "/reset" => Some(UserCommand::Reset),
        "/stop" => Some(UserCommand::StopGeneration),
        "/hush" => Some(UserCommand::StopSpeaking),
        "/ack" => Some(UserCommand::Acknowledge),
        "/speech on" => Some(UserCommand::SetSpeechOutput(true)),
        "/speech off" => Some(UserCommand::SetSpeechOutput(false)),
        _ if line.starts_with('/') => None,
        text => Some(UserCommand::SubmitText(text.to_owned())),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let path = config_path();
    let config = SessionConfig::load_or_default(&path)?;
    tracing::info!("parley-console starting (config: {})", path.display());

    let (sink, events) = session_channel();
    let collaborators = Collaborators {
        recognizer: Arc::new(NoMicrophone),
        engine: Arc::new(EchoEngine { sink: sink.clone() }),
        synthesizer: Arc::new(ConsoleVoice { sink: sink.clone() }),
        context: Arc::new(AlwaysReady),
    };

    let (runtime_tx, mut runtime_rx) = broadcast::channel::<RuntimeEvent>(256);
    let controller = TurnController::new(config, collaborators).with_runtime_events(runtime_tx);
    let conversation = controller.subscribe_conversation();
    let coordinator = SessionCoordinator::new(controller, events);
    let cancel = coordinator.cancel_token();
    let session = tokio::spawn(coordinator.run());

    let printer = tokio::spawn(async move {
        loop {
            match runtime_rx.recv().await {
                Ok(event) => print_event(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("console fell behind by {n} events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    println!("parley v{}. Type a message, or /quit.", env!("CARGO_PKG_VERSION"));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        match line {
            "" => continue,
            "/quit" => break,
            "/history" => {
                let json = serde_json::to_string_pretty(&*conversation.borrow())?;
                println!("{json}");
            }
            _ => match parse_command(line) {
                Some(command) => sink.send(command)?,
                None => println!("unknown command: {line}"),
            },
        }
    }

    cancel.cancel();
    let controller = session.await?;
    drop(controller);
    printer.abort();
    tracing::info!("parley-console shut down cleanly");
    Ok(())
}
