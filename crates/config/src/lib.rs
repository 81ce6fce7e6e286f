//! Configuration loading, validation, and management for StudyGuide.
//!
//! Loads configuration from `~/.studyguide/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.studyguide/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the chat-completions endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL of the OpenAI-compatible endpoint
    #[serde(default = "default_provider_url")]
    pub provider_url: String,

    /// Default model
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Default temperature
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Max tokens per LLM response (unset lets the provider decide)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_max_tokens: Option<u32>,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub agent: AgentConfig,

    #[serde(default)]
    pub speech: SpeechConfig,

    #[serde(default)]
    pub renderer: RendererConfig,

    #[serde(default)]
    pub timeouts: TimeoutConfig,

    #[serde(default)]
    pub auth: AuthConfig,
}

fn default_provider_url() -> String {
    "https://api.groq.com/openai/v1".into()
}
fn default_model() -> String {
    "openai/gpt-oss-120b".into()
}
fn default_temperature() -> f32 {
    0.7
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("provider_url", &self.provider_url)
            .field("default_model", &self.default_model)
            .field("default_temperature", &self.default_temperature)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("gateway", &self.gateway)
            .field("storage", &self.storage)
            .field("agent", &self.agent)
            .field("speech", &self.speech)
            .field("renderer", &self.renderer)
            .field("timeouts", &self.timeouts)
            .field("auth", &self.auth)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    /// Request body cap, applied to uploads
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,

    /// CORS origins; empty allows any origin
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

fn default_port() -> u16 {
    5000
}
fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_max_upload_bytes() -> usize {
    16 * 1024 * 1024
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            max_upload_bytes: default_max_upload_bytes(),
            allowed_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    #[serde(default = "default_uploads_dir")]
    pub uploads_dir: PathBuf,

    #[serde(default = "default_audio_dir")]
    pub audio_dir: PathBuf,
}

fn default_database_path() -> PathBuf {
    AppConfig::config_dir().join("studyguide.db")
}
fn default_uploads_dir() -> PathBuf {
    AppConfig::config_dir().join("uploads")
}
fn default_audio_dir() -> PathBuf {
    AppConfig::config_dir().join("audio")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            uploads_dir: default_uploads_dir(),
            audio_dir: default_audio_dir(),
        }
    }
}

/// Agent loop and prompt assembly limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Upper bound on generate calls per turn
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Prior thread messages replayed to the model
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Characters of each file preview embedded in the system prompt
    #[serde(default = "default_preview_chars")]
    pub preview_chars: usize,

    /// Pages read for a file preview
    #[serde(default = "default_preview_pages")]
    pub preview_pages: usize,

    #[serde(default = "default_max_notes")]
    pub max_notes: usize,

    #[serde(default = "default_max_files")]
    pub max_files: usize,
}

fn default_max_iterations() -> u32 {
    10
}
fn default_history_limit() -> usize {
    50
}
fn default_preview_chars() -> usize {
    500
}
fn default_preview_pages() -> usize {
    5
}
fn default_max_notes() -> usize {
    5
}
fn default_max_files() -> usize {
    3
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            history_limit: default_history_limit(),
            preview_chars: default_preview_chars(),
            preview_pages: default_preview_pages(),
            max_notes: default_max_notes(),
            max_files: default_max_files(),
        }
    }
}

/// Speech synthesis endpoint (OpenAI-compatible `/audio/speech`).
#[derive(Clone, Serialize, Deserialize)]
pub struct SpeechConfig {
    #[serde(default = "default_speech_url")]
    pub api_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_speech_model")]
    pub model: String,

    #[serde(default = "default_voice_style")]
    pub default_voice_style: String,

    /// Voice style name → voice id
    #[serde(default = "default_voices")]
    pub voices: BTreeMap<String, String>,
}

fn default_speech_url() -> String {
    "http://localhost:5050/v1".into()
}
fn default_speech_model() -> String {
    "tts-1".into()
}
fn default_voice_style() -> String {
    "female-english".into()
}
fn default_voices() -> BTreeMap<String, String> {
    [
        ("female-english", "en-US-AriaNeural"),
        ("male-english", "en-US-ChristopherNeural"),
        ("female-hindi", "hi-IN-SwaraNeural"),
        ("male-hindi", "hi-IN-MadhurNeural"),
        ("female-indian-english", "en-IN-NeerjaNeural"),
        ("male-indian-english", "en-IN-PrabhatNeural"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

impl SpeechConfig {
    /// Resolve a voice style to a voice id, falling back to the default style.
    pub fn voice_for(&self, style: Option<&str>) -> String {
        style
            .and_then(|s| self.voices.get(s))
            .or_else(|| self.voices.get(&self.default_voice_style))
            .cloned()
            .unwrap_or_else(|| "en-US-AriaNeural".into())
    }
}

impl std::fmt::Debug for SpeechConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeechConfig")
            .field("api_url", &self.api_url)
            .field("api_key", &redact(&self.api_key))
            .field("model", &self.model)
            .field("default_voice_style", &self.default_voice_style)
            .field("voices", &self.voices)
            .finish()
    }
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            api_url: default_speech_url(),
            api_key: None,
            model: default_speech_model(),
            default_voice_style: default_voice_style(),
            voices: default_voices(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RendererConfig {
    #[serde(default = "default_renderer_url")]
    pub base_url: String,
}

fn default_renderer_url() -> String {
    "https://mermaid.ink".into()
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            base_url: default_renderer_url(),
        }
    }
}

/// Per-collaborator timeouts, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_provider_secs")]
    pub provider_secs: u64,

    #[serde(default = "default_renderer_secs")]
    pub renderer_secs: u64,

    #[serde(default = "default_speech_secs")]
    pub speech_secs: u64,

    #[serde(default = "default_extract_secs")]
    pub extract_secs: u64,
}

fn default_provider_secs() -> u64 {
    120
}
fn default_renderer_secs() -> u64 {
    30
}
fn default_speech_secs() -> u64 {
    60
}
fn default_extract_secs() -> u64 {
    30
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            provider_secs: default_provider_secs(),
            renderer_secs: default_renderer_secs(),
            speech_secs: default_speech_secs(),
            extract_secs: default_extract_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// bcrypt work factor for stored password hashes
    #[serde(default = "default_bcrypt_cost")]
    pub bcrypt_cost: u32,
}

fn default_bcrypt_cost() -> u32 {
    12
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            bcrypt_cost: default_bcrypt_cost(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.studyguide/config.toml).
    ///
    /// Also checks environment variables for the API key:
    /// - `STUDYGUIDE_API_KEY` (highest priority)
    /// - `GROQ_API_KEY`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;

        if config.api_key.is_none() {
            config.api_key = std::env::var("STUDYGUIDE_API_KEY")
                .ok()
                .or_else(|| std::env::var("GROQ_API_KEY").ok())
                .filter(|k| !k.is_empty());
        }

        if let Ok(model) = std::env::var("STUDYGUIDE_MODEL") {
            config.default_model = model;
        }

        if let Ok(url) = std::env::var("STUDYGUIDE_PROVIDER_URL") {
            config.provider_url = url;
        }

        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".studyguide")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_temperature < 0.0 || self.default_temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "default_temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.agent.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_iterations must be at least 1".into(),
            ));
        }

        if !(4..=31).contains(&self.auth.bcrypt_cost) {
            return Err(ConfigError::ValidationError(
                "auth.bcrypt_cost must be between 4 and 31".into(),
            ));
        }

        if !self.speech.voices.contains_key(&self.speech.default_voice_style) {
            return Err(ConfigError::ValidationError(format!(
                "speech.default_voice_style '{}' has no entry in speech.voices",
                self.speech.default_voice_style
            )));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }

    /// Generate a default config TOML string (for `onboard` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            provider_url: default_provider_url(),
            default_model: default_model(),
            default_temperature: default_temperature(),
            default_max_tokens: None,
            gateway: GatewayConfig::default(),
            storage: StorageConfig::default(),
            agent: AgentConfig::default(),
            speech: SpeechConfig::default(),
            renderer: RendererConfig::default(),
            timeouts: TimeoutConfig::default(),
            auth: AuthConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
