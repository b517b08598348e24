//! Configuration types for a conversation session.

use crate::error::{Result, SessionError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default system prompt for a fresh conversation.
pub const DEFAULT_SYSTEM_PROMPT: &str =
    "This is a conversation between user and assistant, a friendly chatbot.";

/// Top-level session configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Conversation and turn-taking behaviour.
    pub conversation: ConversationConfig,
    /// Sampling parameters passed to the inference engine.
    pub generation: GenerationConfig,
    /// Speech recognition settings.
    pub recognition: RecognitionConfig,
    /// Spoken reply settings.
    pub synthesis: SynthesisConfig,
}

/// Conversation and turn-taking behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    /// System message every conversation starts with.
    pub system_prompt: String,
    /// Appended to a reply the user stopped mid-stream.
    pub stopped_notice: String,
    /// Appended to a reply the inference engine failed to finish.
    pub failed_notice: String,
    /// Re-open the microphone after a voice turn completes.
    pub auto_listen: bool,
    /// Return to idle after an interrupted generation instead of waiting for
    /// an acknowledgement.
    pub auto_recover: bool,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_owned(),
            stopped_notice: "\n\n*Generation stopped by user*".to_owned(),
            failed_notice: "\n\n*Generation failed*".to_owned(),
            auto_listen: false,
            auto_recover: false,
        }
    }
}

/// How the conversation is handed to the inference engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptFormat {
    /// Structured message list only; the engine applies its own template.
    #[default]
    Messages,
    /// Also pre-render a ChatML prompt string.
    ChatMl,
}

/// Sampling parameters for one generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Maximum tokens to predict per reply.
    pub max_tokens: usize,
    /// Sampling temperature (0.0 = greedy).
    pub temperature: f64,
    pub top_k: u32,
    /// Top-p (nucleus) sampling threshold.
    pub top_p: f64,
    pub repeat_penalty: f32,
    pub presence_penalty: f32,
    pub frequency_penalty: f32,
    /// Context window of the loaded model (tokens).
    pub context_size_tokens: usize,
    /// Stop sequences.
    pub stop: Vec<String>,
    /// Maximum history messages sent as context, excluding the system prompt.
    ///
    /// Set to 0 to send the whole conversation.
    pub max_history_messages: usize,
    pub prompt_format: PromptFormat,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_tokens: 400,
            temperature: 0.8,
            top_k: 40,
            top_p: 0.9,
            repeat_penalty: 1.2,
            presence_penalty: 0.6,
            frequency_penalty: 0.6,
            context_size_tokens: 2048,
            stop: [
                "</s>",
                "<|end|>",
                "user:",
                "assistant:",
                "<|im_end|>",
                "<|eot_id|>",
                "<|end▁of▁sentence|>",
                "<|end_of_text|>",
            ]
            .into_iter()
            .map(str::to_owned)
            .collect(),
            max_history_messages: 0,
            prompt_format: PromptFormat::Messages,
        }
    }
}

/// Speech recognition settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionConfig {
    /// Locale passed to the recognizer on start.
    pub locale: String,
    /// Utterances shorter than this are discarded (0 = keep everything).
    pub min_speech_duration_ms: u64,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            locale: "en-US".to_owned(),
            min_speech_duration_ms: 0,
        }
    }
}

/// Spoken reply settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    /// Speak finished replies aloud.
    pub enabled: bool,
    pub language: String,
    /// Speech rate (engine scale, 0.5 = slower than normal).
    pub rate: f32,
    pub pitch: f32,
    /// Engine voice identifier (None = engine default).
    pub voice: Option<String>,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            language: "en-US".to_owned(),
            rate: 0.5,
            pitch: 1.0,
            voice: None,
        }
    }
}

impl SessionConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| SessionError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| SessionError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load from `path` when it exists, otherwise fall back to defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file is unreadable or invalid.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            let config = Self::from_file(path)?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Returns the default config file path: `<config dir>/parley/config.toml`.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("parley")
            .join("config.toml")
    }

    /// Reject values no collaborator could work with.
    ///
    /// # Errors
    ///
    /// Returns a config error naming the first invalid field.
    pub fn validate(&self) -> Result<()> {
        let generation = &self.generation;
        if self.conversation.system_prompt.trim().is_empty() {
            return Err(SessionError::Config(
                "conversation.system_prompt must not be empty".to_owned(),
            ));
        }
        if generation.max_tokens == 0 {
            return Err(SessionError::Config(
                "generation.max_tokens must be greater than 0".to_owned(),
            ));
        }
        if generation.context_size_tokens == 0 {
            return Err(SessionError::Config(
                "generation.context_size_tokens must be greater than 0".to_owned(),
            ));
        }
        if generation.temperature.is_nan() || generation.temperature < 0.0 {
            return Err(SessionError::Config(
                "generation.temperature must be non-negative".to_owned(),
            ));
        }
        if !(0.0..=1.0).contains(&generation.top_p) {
            return Err(SessionError::Config(
                "generation.top_p must be within [0, 1]".to_owned(),
            ));
        }
        if !is_positive(self.synthesis.rate) || !is_positive(self.synthesis.pitch) {
            return Err(SessionError::Config(
                "synthesis.rate and synthesis.pitch must be positive".to_owned(),
            ));
        }
        if self.recognition.locale.trim().is_empty() {
            return Err(SessionError::Config(
                "recognition.locale must not be empty".to_owned(),
            ));
        }
        Ok(())
    }
}

fn is_positive(value: f32) -> bool {
    value.is_finite() && value > 0.0
}
