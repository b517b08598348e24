//! Turn controller: the state machine that decides who holds the turn.
//!
//! The controller is the only component that starts or stops the speech
//! recognizer, the inference engine and the speech synthesizer, and the only
//! writer of the conversation store. It consumes one [`SessionEvent`] at a
//! time and always reads its own current state, so a late collaborator
//! callback can never act on stale data.
//!
//! ```text
//!            mic (gate)              final result
//!   Idle ───────────────▶ Listening ──────────────▶ Generating ──▶ Speaking
//!    ▲  ◀── empty/error ──┘                           │   │           │
//!    │         typed text ─────────────────────────▶  │   │           │
//!    ├──────────── completed, nothing to speak ◀──────┘   │           │
//!    ├──────────── synthesis finished/cancelled ◀─────────┼───────────┘
//!    └── acknowledge ── Faulted ◀── stop / engine error ──┘
//! ```

use crate::config::SessionConfig;
use crate::conversation::{ConversationSnapshot, ConversationStore, Message};
use crate::llm::{ContextProvider, GenerationRequest, InferenceEngine};
use crate::pipeline::classifier::{ClassifierOutput, ResponseClassifier};
use crate::pipeline::gate;
use crate::pipeline::messages::{
    ContextEvent, GenerationEvent, GenerationStats, GenerationTimings, RecognitionEvent,
    SessionEvent, SynthesisEvent, TurnState, UserCommand,
};
use crate::runtime::RuntimeEvent;
use crate::stt::SpeechRecognizer;
use crate::tts::{SpeakRequest, SpeechSynthesizer};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Handles to the external engines a session drives.
#[derive(Clone)]
pub struct Collaborators {
    pub recognizer: Arc<dyn SpeechRecognizer>,
    pub engine: Arc<dyn InferenceEngine>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub context: Arc<dyn ContextProvider>,
}

/// How the user started the current turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TurnSource {
    Voice,
    Text,
}

/// Bookkeeping while the recognizer is listening.
#[derive(Debug)]
struct ListeningTurn {
    opened_at: Instant,
    /// Set by the recognizer's `Started` event.
    speech_started_at: Option<Instant>,
    transcript: String,
    stop_requested: bool,
}

impl ListeningTurn {
    fn new() -> Self {
        Self {
            opened_at: Instant::now(),
            speech_started_at: None,
            transcript: String::new(),
            stop_requested: false,
        }
    }

    /// How long the user has been speaking, or the whole listening time if
    /// the recognizer never reported the start of speech.
    fn speech_duration(&self) -> Duration {
        self.speech_started_at.unwrap_or(self.opened_at).elapsed()
    }
}

/// The utterance currently being played.
#[derive(Debug, Clone, Copy)]
struct SpeakingTurn {
    utterance_id: Uuid,
    source: TurnSource,
}

/// The in-flight generation and its scan state.
#[derive(Debug)]
struct ActiveGeneration {
    id: Uuid,
    cancel: CancellationToken,
    classifier: ResponseClassifier,
    source: TurnSource,
    started_at: Instant,
    token_count: usize,
}

impl ActiveGeneration {
    fn stats(&self, timings: Option<GenerationTimings>) -> GenerationStats {
        let elapsed = self.started_at.elapsed();
        GenerationStats {
            request_id: self.id,
            token_count: self.token_count,
            elapsed,
            tokens_per_second: timings
                .map(|t| t.predicted_per_second)
                .unwrap_or_else(|| tokens_per_second(self.token_count, elapsed)),
        }
    }
}

fn tokens_per_second(tokens: usize, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 { tokens as f64 / secs } else { 0.0 }
}

/// Finite-state machine owning the conversation of one session.
pub struct TurnController {
    config: SessionConfig,
    store: ConversationStore,
    state: TurnState,
    collaborators: Collaborators,
    listening: Option<ListeningTurn>,
    generation: Option<ActiveGeneration>,
    speaking: Option<SpeakingTurn>,
    speech_output: bool,
    state_tx: watch::Sender<TurnState>,
    snapshot_tx: watch::Sender<ConversationSnapshot>,
    runtime_tx: Option<broadcast::Sender<RuntimeEvent>>,
}

impl TurnController {
    /// Create a controller with a fresh conversation in the `Idle` state.
    pub fn new(config: SessionConfig, collaborators: Collaborators) -> Self {
        let store = ConversationStore::new(&config.conversation.system_prompt);
        let (state_tx, _) = watch::channel(TurnState::Idle);
        let (snapshot_tx, _) = watch::channel(store.snapshot());
        let speech_output = config.synthesis.enabled;
        Self {
            config,
            store,
            state: TurnState::Idle,
            collaborators,
            listening: None,
            generation: None,
            speaking: None,
            speech_output,
            state_tx,
            snapshot_tx,
            runtime_tx: None,
        }
    }

    /// Attach a runtime event broadcaster for UI/observability.
    pub fn with_runtime_events(mut self, tx: broadcast::Sender<RuntimeEvent>) -> Self {
        self.runtime_tx = Some(tx);
        self
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Read-only view of the conversation store.
    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    pub fn snapshot(&self) -> ConversationSnapshot {
        self.store.snapshot()
    }

    /// Follow turn transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<TurnState> {
        self.state_tx.subscribe()
    }

    /// Follow the conversation; a new snapshot is published after every write.
    pub fn subscribe_conversation(&self) -> watch::Receiver<ConversationSnapshot> {
        self.snapshot_tx.subscribe()
    }

    /// Id of the generation whose tokens are currently accepted.
    pub fn active_request_id(&self) -> Option<Uuid> {
        self.generation.as_ref().map(|g| g.id)
    }

    /// Id of the utterance whose synthesis events are currently accepted.
    pub fn active_utterance_id(&self) -> Option<Uuid> {
        self.speaking.map(|s| s.utterance_id)
    }

    /// Whether finished replies are spoken aloud.
    pub fn speech_output_enabled(&self) -> bool {
        self.speech_output
    }

    /// Process one event and return the resulting state.
    pub async fn handle(&mut self, event: SessionEvent) -> TurnState {
        match event {
            SessionEvent::User(cmd) => self.on_user(cmd).await,
            SessionEvent::Recognition(ev) => self.on_recognition(ev).await,
            SessionEvent::Generation(ev) => self.on_generation(ev).await,
            SessionEvent::Synthesis(ev) => self.on_synthesis(ev).await,
            SessionEvent::Context(ev) => self.on_context(ev).await,
        }
        self.state
    }

    /// Stop whatever collaborator is active. Used when the session ends.
    pub async fn shutdown(&mut self) {
        info!(state = %self.state, "shutting down turn controller");
        self.teardown_active().await;
    }

    // ── user commands ─────────────────────────────────────────────────

    async fn on_user(&mut self, cmd: UserCommand) {
        match cmd {
            UserCommand::ActivateMic => self.activate_mic().await,
            UserCommand::DeactivateMic => self.deactivate_mic().await,
            UserCommand::SubmitText(text) => self.submit_text(text).await,
            UserCommand::StopGeneration => self.stop_generation(),
            UserCommand::StopSpeaking => self.stop_speaking().await,
            UserCommand::Acknowledge => self.acknowledge(),
            UserCommand::Reset => self.reset().await,
            UserCommand::SetSpeechOutput(enabled) => {
                info!("speech output {}", if enabled { "enabled" } else { "disabled" });
                self.speech_output = enabled;
            }
        }
    }

    async fn activate_mic(&mut self) {
        let has_context = self.collaborators.context.is_ready();
        if !gate::can_activate_mic(self.state, has_context) {
            if !has_context {
                self.notice("The model is not loaded yet.");
            }
            self.reject(UserCommand::ActivateMic);
            return;
        }

        let locale = self.config.recognition.locale.clone();
        match self.collaborators.recognizer.start(&locale).await {
            Ok(()) => {
                self.listening = Some(ListeningTurn::new());
                self.transition(TurnState::Listening);
            }
            Err(e) => {
                warn!("failed to start speech recognition: {e}");
                self.notice(format!("Voice recognition failed to start: {e}"));
            }
        }
    }

    async fn deactivate_mic(&mut self) {
        if self.state != TurnState::Listening {
            self.reject(UserCommand::DeactivateMic);
            return;
        }
        match self.collaborators.recognizer.stop().await {
            Ok(()) => {
                debug!("recognizer stop requested, waiting for the final result");
                if let Some(listening) = self.listening.as_mut() {
                    listening.stop_requested = true;
                }
            }
            Err(e) => {
                warn!("failed to stop speech recognition: {e}");
                self.listening = None;
                self.transition(TurnState::Idle);
            }
        }
    }

    async fn submit_text(&mut self, text: String) {
        let text = text.trim();
        let has_context = self.collaborators.context.is_ready();
        if text.is_empty() || !gate::can_submit_text(self.state, has_context) {
            if !has_context {
                self.notice("The model is not loaded yet.");
            }
            self.reject(UserCommand::SubmitText(text.to_owned()));
            return;
        }
        self.begin_turn(text.to_owned(), TurnSource::Text).await;
    }

    fn stop_generation(&mut self) {
        if !gate::can_stop_generation(self.state) {
            self.reject(UserCommand::StopGeneration);
            return;
        }
        info!("generation stopped by user");
        let notice = self.config.conversation.stopped_notice.clone();
        self.interrupt_generation(&notice, "Generation stopped.");
    }

    async fn stop_speaking(&mut self) {
        if self.state != TurnState::Speaking {
            self.reject(UserCommand::StopSpeaking);
            return;
        }
        if let Err(e) = self.collaborators.synthesizer.stop().await {
            warn!("failed to stop speech synthesis: {e}");
        }
        self.speaking = None;
        self.transition(TurnState::Idle);
    }

    fn acknowledge(&mut self) {
        if self.state != TurnState::Faulted {
            self.reject(UserCommand::Acknowledge);
            return;
        }
        self.transition(TurnState::Idle);
    }

    async fn reset(&mut self) {
        info!(state = %self.state, "resetting conversation");
        self.teardown_active().await;
        self.store.reset(&self.config.conversation.system_prompt);
        self.publish_snapshot();
        self.transition(TurnState::Idle);
    }

    // ── speech recognition ───────────────────────────────────────────

    async fn on_recognition(&mut self, event: RecognitionEvent) {
        if self.state != TurnState::Listening {
            debug!(state = %self.state, ?event, "ignoring recognition event");
            return;
        }
        match event {
            RecognitionEvent::Started => {
                debug!("speech started");
                if let Some(listening) = self.listening.as_mut() {
                    listening.speech_started_at.get_or_insert_with(Instant::now);
                }
            }
            RecognitionEvent::PartialResult(text) => {
                if let Some(listening) = self.listening.as_mut() {
                    listening.transcript.clone_from(&text);
                }
                self.emit(RuntimeEvent::PartialTranscript(text));
            }
            RecognitionEvent::FinalResult(text) => self.finish_listening(text, false).await,
            RecognitionEvent::Ended => {
                let transcript = self
                    .listening
                    .as_mut()
                    .map(|l| std::mem::take(&mut l.transcript))
                    .unwrap_or_default();
                self.finish_listening(transcript, true).await;
            }
            RecognitionEvent::Error(code) => {
                warn!("speech recognition error: {code}");
                let listening = self.listening.take();
                if listening.is_some_and(|l| !l.stop_requested) {
                    self.stop_recognizer().await;
                }
                self.transition(TurnState::Idle);
                self.notice(format!("Voice recognition failed: {code}"));
            }
        }
    }

    async fn finish_listening(&mut self, text: String, recognizer_ended: bool) {
        let listening = self.listening.take();
        let needs_stop = !recognizer_ended && listening.as_ref().is_some_and(|l| !l.stop_requested);
        if needs_stop {
            self.stop_recognizer().await;
        }

        let text = text.trim();
        if text.is_empty() {
            info!("no speech recognized");
            self.transition(TurnState::Idle);
            return;
        }

        let min = Duration::from_millis(self.config.recognition.min_speech_duration_ms);
        if let Some(listening) = listening {
            let spoken = listening.speech_duration();
            if spoken < min {
                info!(spoken_ms = spoken.as_millis() as u64, "speech too short, ignoring");
                self.transition(TurnState::Idle);
                return;
            }
        }

        info!("final transcription: \"{text}\"");
        self.begin_turn(text.to_owned(), TurnSource::Voice).await;
    }

    async fn stop_recognizer(&self) {
        if let Err(e) = self.collaborators.recognizer.stop().await {
            warn!("failed to stop speech recognition: {e}");
        }
    }

    // ── generation ───────────────────────────────────────────────────

    async fn begin_turn(&mut self, text: String, source: TurnSource) {
        if let Err(e) = self.store.append(Message::user(text)) {
            error!("cannot start a turn: {e}");
            self.notice("Could not add your message to the conversation.");
            self.transition(TurnState::Idle);
            return;
        }
        if let Err(e) = self.store.begin_assistant_turn() {
            error!("cannot open an assistant reply: {e}");
            self.publish_snapshot();
            self.notice("Could not start a reply.");
            self.transition(TurnState::Idle);
            return;
        }
        self.publish_snapshot();

        let request = GenerationRequest::new(self.store.finalized_history(), &self.config.generation);
        info!(
            request_id = %request.id,
            messages = request.messages.len(),
            "opening generation"
        );
        self.generation = Some(ActiveGeneration {
            id: request.id,
            cancel: request.cancel.clone(),
            classifier: ResponseClassifier::new(),
            source,
            started_at: Instant::now(),
            token_count: 0,
        });

        match self.collaborators.engine.generate(request).await {
            Ok(()) => self.transition(TurnState::Generating),
            Err(e) => {
                warn!("failed to open generation: {e}");
                let notice = self.config.conversation.failed_notice.clone();
                self.interrupt_generation(&notice, &format!("Failed to generate a response: {e}"));
            }
        }
    }

    async fn on_generation(&mut self, event: GenerationEvent) {
        let active_id = self.active_request_id();
        if self.state != TurnState::Generating || active_id != Some(event.request_id()) {
            debug!(
                request_id = %event.request_id(),
                state = %self.state,
                "discarding event from an inactive generation"
            );
            return;
        }

        match event {
            GenerationEvent::Token { text, .. } => {
                let Some(active) = self.generation.as_mut() else {
                    return;
                };
                active.token_count += 1;
                let out = active.classifier.push(&text);
                self.apply_classified(out);
            }
            GenerationEvent::Completed { timings, .. } => self.complete_generation(timings).await,
            GenerationEvent::Failed { message, .. } => {
                warn!("generation failed: {message}");
                let notice = self.config.conversation.failed_notice.clone();
                self.interrupt_generation(&notice, &format!("Generation failed: {message}"));
            }
        }
    }

    /// Fold classifier output into the open reply.
    fn apply_classified(&mut self, out: ClassifierOutput) {
        let mut changed = false;
        if !out.visible.is_empty() && self.store.apply_visible_delta(&out.visible).is_ok() {
            changed = true;
            self.emit(RuntimeEvent::AssistantDelta(out.visible));
        }
        match out.thought {
            Some(thought) if thought.is_empty() => debug!("empty reasoning block, not stored"),
            Some(thought) => {
                if self.store.set_thought(&thought).is_ok() {
                    changed = true;
                    self.emit(RuntimeEvent::ThoughtCompleted(thought));
                }
            }
            None => {}
        }
        if let Some(anomaly) = out.anomaly {
            warn!(?anomaly, "model output was malformed, passed through");
        }
        if changed {
            self.publish_snapshot();
        }
    }

    async fn complete_generation(&mut self, timings: Option<GenerationTimings>) {
        let Some(mut active) = self.generation.take() else {
            return;
        };
        let tail = active.classifier.finish();
        self.apply_classified(tail);
        if let Err(e) = self.store.finalize_assistant_turn() {
            error!("could not close the completed reply: {e}");
        }
        self.publish_snapshot();

        let stats = active.stats(timings);
        info!(
            tokens = stats.token_count,
            elapsed_ms = stats.elapsed.as_millis() as u64,
            "generation completed at {:.1} tok/s",
            stats.tokens_per_second
        );
        self.emit(RuntimeEvent::GenerationFinished(stats));

        let reply = self
            .store
            .last()
            .map(|m| m.content.trim().to_owned())
            .unwrap_or_default();
        if reply.is_empty() || !self.speech_output {
            self.transition(TurnState::Idle);
            self.maybe_auto_listen(active.source).await;
            return;
        }

        let request = SpeakRequest::new(reply, &self.config.synthesis);
        let utterance_id = request.id;
        match self.collaborators.synthesizer.speak(request).await {
            Ok(()) => {
                self.speaking = Some(SpeakingTurn {
                    utterance_id,
                    source: active.source,
                });
                self.transition(TurnState::Speaking);
            }
            Err(e) => {
                warn!("failed to start speech synthesis: {e}");
                self.notice(format!("Could not speak the reply: {e}"));
                self.transition(TurnState::Idle);
            }
        }
    }

    /// Close the open reply after a stop or an engine failure.
    ///
    /// Cancellation is only signalled, never awaited, so an unresponsive
    /// engine cannot hold the controller in `Generating`.
    fn interrupt_generation(&mut self, notice: &str, reason: &str) {
        let Some(mut active) = self.generation.take() else {
            return;
        };
        active.cancel.cancel();
        let tail = active.classifier.finish();
        self.apply_classified(tail);
        match self.store.apply_visible_delta(notice) {
            Ok(()) => self.emit(RuntimeEvent::AssistantDelta(notice.to_owned())),
            Err(e) => error!("could not append the interruption notice: {e}"),
        }
        if let Err(e) = self.store.finalize_assistant_turn() {
            error!("could not close the interrupted reply: {e}");
        }
        self.publish_snapshot();
        self.notice(reason);

        if self.config.conversation.auto_recover {
            self.transition(TurnState::Idle);
        } else {
            self.transition(TurnState::Faulted);
        }
    }

    // ── speech synthesis ─────────────────────────────────────────────

    async fn on_synthesis(&mut self, event: SynthesisEvent) {
        let current = self.speaking.map(|s| s.utterance_id);
        if self.state != TurnState::Speaking || current != Some(event.utterance_id()) {
            debug!(state = %self.state, ?event, "ignoring synthesis event");
            return;
        }
        match event {
            SynthesisEvent::Started { .. } => debug!("speech playback started"),
            SynthesisEvent::Finished { .. } => {
                let speaking = self.speaking.take();
                self.transition(TurnState::Idle);
                if let Some(speaking) = speaking {
                    self.maybe_auto_listen(speaking.source).await;
                }
            }
            SynthesisEvent::Cancelled { .. } => {
                info!("speech playback cancelled");
                self.speaking = None;
                self.transition(TurnState::Idle);
            }
            SynthesisEvent::Error { message, .. } => {
                warn!("speech synthesis error: {message}");
                self.speaking = None;
                self.transition(TurnState::Idle);
                self.notice(format!("Speech playback failed: {message}"));
            }
        }
    }

    async fn maybe_auto_listen(&mut self, source: TurnSource) {
        if self.config.conversation.auto_listen && source == TurnSource::Voice {
            debug!("auto-listen: re-opening the microphone");
            self.activate_mic().await;
        }
    }

    // ── model context ────────────────────────────────────────────────

    async fn on_context(&mut self, event: ContextEvent) {
        match event {
            ContextEvent::Ready => info!("model context ready"),
            ContextEvent::Lost { reason } => {
                error!(state = %self.state, "model context lost: {reason}");
                self.teardown_active().await;
                self.store.reset(&self.config.conversation.system_prompt);
                self.publish_snapshot();
                self.notice(format!("The model context was lost: {reason}"));
                self.transition(TurnState::Faulted);
            }
        }
    }

    // ── helpers ──────────────────────────────────────────────────────

    /// Best-effort stop of whichever collaborator is active.
    async fn teardown_active(&mut self) {
        if let Some(active) = self.generation.take() {
            active.cancel.cancel();
        }
        match self.state {
            TurnState::Listening => {
                let listening = self.listening.take();
                if listening.is_some_and(|l| !l.stop_requested) {
                    self.stop_recognizer().await;
                }
            }
            TurnState::Speaking => {
                if let Err(e) = self.collaborators.synthesizer.stop().await {
                    warn!("failed to stop speech synthesis: {e}");
                }
            }
            _ => {}
        }
        self.listening = None;
        self.speaking = None;
    }

    fn transition(&mut self, to: TurnState) {
        let from = self.state;
        if from == to {
            return;
        }
        info!("turn state {from} -> {to}");
        self.state = to;
        self.state_tx.send_replace(to);
        self.emit(RuntimeEvent::StateChanged { from, to });
    }

    fn publish_snapshot(&self) {
        self.snapshot_tx.send_replace(self.store.snapshot());
    }

    fn reject(&self, command: UserCommand) {
        debug!(state = %self.state, ?command, "user action rejected");
        self.emit(RuntimeEvent::ActionRejected {
            command,
            state: self.state,
        });
    }

    fn notice(&self, message: impl Into<String>) {
        self.emit(RuntimeEvent::Notice(message.into()));
    }

    fn emit(&self, event: RuntimeEvent) {
        if let Some(tx) = &self.runtime_tx {
            let _ = tx.send(event);
        }
    }
}
