//! Scripted collaborators shared by unit and integration tests.
//!
//! Every mock records its calls into one [`CallLog`], so a test can assert
//! the exact order in which the controller drove the recognizer, the
//! engine and the synthesizer.

use crate::config::SessionConfig;
use crate::error::{Result, SessionError};
use crate::llm::{ContextProvider, GenerationRequest, InferenceEngine};
use crate::pipeline::controller::{Collaborators, TurnController};
use crate::pipeline::messages::{EventSink, GenerationEvent};
use crate::runtime::RuntimeEvent;
use crate::stt::SpeechRecognizer;
use crate::tts::{SpeakRequest, SpeechSynthesizer};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;
use uuid::Uuid;

/// One observed collaborator call.
#[derive(Debug, Clone, PartialEq)]
pub enum CollaboratorCall {
    RecognizerStart { locale: String },
    RecognizerStop,
    Generate { request_id: Uuid },
    Speak(SpeakRequest),
    SynthesizerStop,
}

/// Ordered, shared record of collaborator calls.
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<CollaboratorCall>>>);

impl CallLog {
    pub fn record(&self, call: CollaboratorCall) {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).push(call);
    }

    pub fn calls(&self) -> Vec<CollaboratorCall> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Id of the most recently spoken utterance.
    pub fn last_utterance_id(&self) -> Option<Uuid> {
        self.calls().into_iter().rev().find_map(|call| match call {
            CollaboratorCall::Speak(request) => Some(request.id),
            _ => None,
        })
    }

    pub fn clear(&self) {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

/// Recognizer that records start/stop and can be told to fail.
#[derive(Debug, Default)]
pub struct MockRecognizer {
    log: CallLog,
    fail_start: AtomicBool,
}

impl MockRecognizer {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            fail_start: AtomicBool::new(false),
        }
    }

    pub fn fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl SpeechRecognizer for MockRecognizer {
    async fn start(&self, locale: &str) -> Result<()> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(SessionError::Recognition("microphone unavailable".to_owned()));
        }
        self.log.record(CollaboratorCall::RecognizerStart {
            locale: locale.to_owned(),
        });
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.log.record(CollaboratorCall::RecognizerStop);
        Ok(())
    }
}

/// Engine that records requests and optionally streams a scripted reply.
///
/// With a script attached, each accepted request spawns a task that sends
/// the fragments as token events and then `Completed`, stopping early when
/// the request is cancelled.
#[derive(Debug, Default)]
pub struct MockEngine {
    log: CallLog,
    requests: Mutex<Vec<GenerationRequest>>,
    script: Mutex<Option<(EventSink, Vec<String>)>>,
    fail: AtomicBool,
}

impl MockEngine {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    /// Stream `fragments` back through `sink` for every request.
    pub fn with_script(self, sink: EventSink, fragments: &[&str]) -> Self {
        let fragments = fragments.iter().map(|f| (*f).to_owned()).collect();
        *self.script.lock().unwrap_or_else(PoisonError::into_inner) = Some((sink, fragments));
        self
    }

    pub fn fail_generate(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn last_request(&self) -> Option<GenerationRequest> {
        self.requests().pop()
    }
}

#[async_trait]
impl InferenceEngine for MockEngine {
    async fn generate(&self, request: GenerationRequest) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SessionError::Generation("engine busy".to_owned()));
        }
        self.log.record(CollaboratorCall::Generate {
            request_id: request.id,
        });

        let script = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some((sink, fragments)) = script {
            let id = request.id;
            let cancel = request.cancel.clone();
            tokio::spawn(async move {
                for text in fragments {
                    if cancel.is_cancelled() {
                        return;
                    }
                    if sink.send(GenerationEvent::Token { request_id: id, text }).is_err() {
                        return;
                    }
                    tokio::task::yield_now().await;
                }
                let _ = sink.send(GenerationEvent::Completed {
                    request_id: id,
                    timings: None,
                });
            });
        }

        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);
        Ok(())
    }
}

/// Synthesizer that records utterances and can be told to fail.
#[derive(Debug, Default)]
pub struct MockSynthesizer {
    log: CallLog,
    fail_speak: AtomicBool,
}

impl MockSynthesizer {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            fail_speak: AtomicBool::new(false),
        }
    }

    pub fn fail_speak(&self, fail: bool) {
        self.fail_speak.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl SpeechSynthesizer for MockSynthesizer {
    async fn speak(&self, request: SpeakRequest) -> Result<()> {
        if self.fail_speak.load(Ordering::SeqCst) {
            return Err(SessionError::Synthesis("no voice installed".to_owned()));
        }
        self.log.record(CollaboratorCall::Speak(request));
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.log.record(CollaboratorCall::SynthesizerStop);
        Ok(())
    }
}

/// Context provider with a switchable readiness flag.
#[derive(Debug)]
pub struct MockContext {
    ready: AtomicBool,
}

impl MockContext {
    pub fn new(ready: bool) -> Self {
        Self {
            ready: AtomicBool::new(ready),
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }
}

impl ContextProvider for MockContext {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

/// A controller wired to mocks, with handles to each mock.
pub struct MockSession {
    pub controller: TurnController,
    pub log: CallLog,
    pub recognizer: Arc<MockRecognizer>,
    pub engine: Arc<MockEngine>,
    pub synthesizer: Arc<MockSynthesizer>,
    pub context: Arc<MockContext>,
}

impl MockSession {
    /// Controller with a ready context and non-streaming mocks.
    pub fn new(config: SessionConfig) -> Self {
        let log = CallLog::default();
        let engine = MockEngine::new(log.clone());
        Self::with_engine(config, log, engine)
    }

    /// Controller around a caller-built engine, e.g. one with a script.
    pub fn with_engine(config: SessionConfig, log: CallLog, engine: MockEngine) -> Self {
        let recognizer = Arc::new(MockRecognizer::new(log.clone()));
        let engine = Arc::new(engine);
        let synthesizer = Arc::new(MockSynthesizer::new(log.clone()));
        let context = Arc::new(MockContext::new(true));
        let collaborators = Collaborators {
            recognizer: recognizer.clone(),
            engine: engine.clone(),
            synthesizer: synthesizer.clone(),
            context: context.clone(),
        };
        Self {
            controller: TurnController::new(config, collaborators),
            log,
            recognizer,
            engine,
            synthesizer,
            context,
        }
    }

    /// Attach a runtime event broadcaster to the controller.
    pub fn with_runtime_events(mut self, tx: broadcast::Sender<RuntimeEvent>) -> Self {
        self.controller = self.controller.with_runtime_events(tx);
        self
    }

    /// Id of the most recent generation request.
    pub fn last_request_id(&self) -> Option<Uuid> {
        self.engine.last_request().map(|r| r.id)
    }
}
