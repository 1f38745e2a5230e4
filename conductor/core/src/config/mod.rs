//! TOML Configuration File Support
//!
//! Centralized configuration loading for Lily, from a TOML file at
//! `~/.config/lily/lily.toml`.
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. CLI arguments (applied through [`ConfigOverrides`])
//! 2. Environment variables (`LILY_*`)
//! 3. TOML configuration file
//! 4. Default values
//!
//! # XDG Base Directory Compliance
//!
//! - Config: `$XDG_CONFIG_HOME/lily/lily.toml`
//! - Conversation store: `$XDG_DATA_HOME/lily/conversation.jsonl`
//!
//! # Example Configuration
//!
//! ```toml
//! [remote]
//! base_url = "https://lily.example.net"
//! api_key = "secret"
//! connect_timeout_ms = 10000
//! read_timeout_ms = 30000
//!
//! [conversation]
//! language = "en-US"
//! new_session = true
//!
//! [recognition]
//! enabled = true
//! wake_phrases = ["hey lily", "hi lily"]
//! backoff_base_ms = 100
//! backoff_max_ms = 5000
//!
//! [speech]
//! enabled = true
//!
//! [store]
//! path = "/var/lib/lily/conversation.jsonl"
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::conductor::ConductorConfig;
use crate::recognition::RecognitionConfig;
use crate::remote::{RemoteEndpoint, SharedCredentials, Timeouts};

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// Remote service section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteToml {
    /// Base URL of the assistant service
    pub base_url: Option<String>,

    /// API key sent as `x-api-key`
    pub api_key: Option<String>,

    /// Connection timeout in milliseconds (capped at 20 s)
    pub connect_timeout_ms: Option<u64>,

    /// Request timeout in milliseconds (capped at 30 s)
    pub read_timeout_ms: Option<u64>,
}

/// Conversation section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationToml {
    /// Language tag sent with queries
    pub language: Option<String>,

    /// Fixed session id sent with queries
    pub session_id: Option<String>,

    /// Generate a fresh session id per process when none is set
    pub new_session: Option<bool>,
}

/// Recognition section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionToml {
    /// Whether to run the wake-phrase loop
    pub enabled: Option<bool>,

    /// Wake phrases
    pub wake_phrases: Option<Vec<String>>,

    /// First restart delay in milliseconds
    pub backoff_base_ms: Option<u64>,

    /// Restart delay ceiling in milliseconds
    pub backoff_max_ms: Option<u64>,
}

/// Speech section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechToml {
    /// Whether replies are spoken
    pub enabled: Option<bool>,
}

/// Store section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreToml {
    /// Conversation file
    pub path: Option<PathBuf>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LilyToml {
    /// Remote service section
    pub remote: RemoteToml,

    /// Conversation section
    pub conversation: ConversationToml,

    /// Recognition section
    pub recognition: RecognitionToml,

    /// Speech section
    pub speech: SpeechToml,

    /// Store section
    pub store: StoreToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Resolved configuration
///
/// Use [`load_config`] to load with proper priority handling.
#[derive(Clone, Debug)]
pub struct LilyConfig {
    /// Remote service endpoint
    pub remote_endpoint: RemoteEndpoint,

    /// Remote timeouts
    pub timeouts: Timeouts,

    /// Conductor settings
    pub conductor: ConductorConfig,

    /// Recognition loop settings
    pub recognition: RecognitionConfig,

    /// Whether to run the recognition loop
    pub listen_enabled: bool,

    /// Whether replies are spoken
    pub speech_enabled: bool,

    /// Conversation file
    pub store_path: Option<PathBuf>,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    /// Source of configuration values
    source: ConfigSource,
}

impl Default for LilyConfig {
    fn default() -> Self {
        Self {
            remote_endpoint: RemoteEndpoint::default(),
            timeouts: Timeouts::default(),
            conductor: ConductorConfig::default(),
            recognition: RecognitionConfig::default(),
            listen_enabled: true,
            speech_enabled: true,
            store_path: default_store_path(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl LilyConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Runtime-settable credentials seeded from this configuration
    #[must_use]
    pub fn shared_credentials(&self) -> SharedCredentials {
        SharedCredentials::new(self.remote_endpoint.clone())
    }

    /// Check values that parse but cannot work
    ///
    /// # Errors
    ///
    /// `ValidationError` describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let base = self.remote_endpoint.base_url.trim();
        let scheme_ok = reqwest::Url::parse(base)
            .map(|url| matches!(url.scheme(), "http" | "https"))
            .unwrap_or(false);
        if !scheme_ok {
            return Err(ConfigError::ValidationError(format!(
                "remote base_url must be an http(s) URL, got '{base}'"
            )));
        }

        if self.listen_enabled
            && self
                .recognition
                .wake_phrases
                .iter()
                .all(|p| p.trim().is_empty())
        {
            return Err(ConfigError::ValidationError(
                "recognition is enabled but no wake phrase is configured".to_string(),
            ));
        }

        if self.recognition.backoff_base.is_zero() {
            return Err(ConfigError::ValidationError(
                "recognition backoff_base_ms must be greater than zero".to_string(),
            ));
        }

        if self.recognition.backoff_base > self.recognition.backoff_max {
            return Err(ConfigError::ValidationError(
                "recognition backoff_base_ms exceeds backoff_max_ms".to_string(),
            ));
        }

        if self.timeouts.connect().is_zero() || self.timeouts.request().is_zero() {
            return Err(ConfigError::ValidationError(
                "remote connect_timeout_ms and read_timeout_ms must be greater than zero"
                    .to_string(),
            ));
        }

        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/lily/lily.toml` or `~/.config/lily/lily.toml`
/// if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("lily").join("lily.toml"))
}

/// Get the default conversation store path
#[must_use]
pub fn default_store_path() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join("lily").join("conversation.jsonl"))
}

/// Load configuration from all sources with proper priority
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed.
/// A missing config file is not an error (defaults are used).
pub fn load_config() -> Result<LilyConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<LilyConfig, ConfigError> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

/// Load configuration reading environment variables through `env`
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed.
pub fn load_config_with_env<F>(path: Option<PathBuf>, env: F) -> Result<LilyConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = LilyConfig::default();
    let mut new_session = false;

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: LilyToml = toml::from_str(&toml_content)?;
            new_session = toml_config.conversation.new_session.unwrap_or(false);
            apply_toml_config(&mut config, &toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config, &env);

    if new_session && config.conductor.session_id.is_none() {
        config.conductor.session_id = Some(uuid::Uuid::new_v4().to_string());
    }

    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut LilyConfig, toml: &LilyToml) {
    // Remote
    if let Some(ref base_url) = toml.remote.base_url {
        config.remote_endpoint.base_url = base_url.clone();
    }
    if let Some(ref api_key) = toml.remote.api_key {
        config.remote_endpoint.api_key = api_key.clone();
    }
    let connect = toml
        .remote
        .connect_timeout_ms
        .map_or(config.timeouts.connect(), Duration::from_millis);
    let request = toml
        .remote
        .read_timeout_ms
        .map_or(config.timeouts.request(), Duration::from_millis);
    config.timeouts = Timeouts::new(connect, request);

    // Conversation
    if toml.conversation.language.is_some() {
        config.conductor.language = toml.conversation.language.clone();
    }
    if toml.conversation.session_id.is_some() {
        config.conductor.session_id = toml.conversation.session_id.clone();
    }

    // Recognition
    if let Some(enabled) = toml.recognition.enabled {
        config.listen_enabled = enabled;
    }
    if let Some(ref phrases) = toml.recognition.wake_phrases {
        config.recognition.wake_phrases = phrases.clone();
    }
    if let Some(ms) = toml.recognition.backoff_base_ms {
        config.recognition.backoff_base = Duration::from_millis(ms);
    }
    if let Some(ms) = toml.recognition.backoff_max_ms {
        config.recognition.backoff_max = Duration::from_millis(ms);
    }

    // Speech
    if let Some(enabled) = toml.speech.enabled {
        config.speech_enabled = enabled;
    }

    // Store
    if toml.store.path.is_some() {
        config.store_path = toml.store.path.clone();
    }
}

fn parse_flag(value: &str) -> bool {
    value != "0" && value.to_lowercase() != "false"
}

/// Apply environment variable overrides to the config
fn apply_env_config<F>(config: &mut LilyConfig, env: &F)
where
    F: Fn(&str) -> Option<String>,
{
    // Remote
    if let Some(base_url) = env("LILY_BASE_URL") {
        config.remote_endpoint.base_url = base_url;
        config.source = ConfigSource::Env;
    }
    if let Some(api_key) = env("LILY_API_KEY") {
        config.remote_endpoint.api_key = api_key;
        config.source = ConfigSource::Env;
    }
    if let Some(ms) = env("LILY_CONNECT_TIMEOUT").and_then(|v| v.parse::<u64>().ok()) {
        config.timeouts = Timeouts::new(Duration::from_millis(ms), config.timeouts.request());
        config.source = ConfigSource::Env;
    }
    if let Some(ms) = env("LILY_READ_TIMEOUT").and_then(|v| v.parse::<u64>().ok()) {
        config.timeouts = Timeouts::new(config.timeouts.connect(), Duration::from_millis(ms));
        config.source = ConfigSource::Env;
    }

    // Conversation
    if let Some(language) = env("LILY_LANGUAGE") {
        config.conductor.language = Some(language);
        config.source = ConfigSource::Env;
    }
    if let Some(session_id) = env("LILY_SESSION_ID") {
        config.conductor.session_id = Some(session_id);
        config.source = ConfigSource::Env;
    }

    // Recognition
    if let Some(phrases) = env("LILY_WAKE_PHRASES") {
        config.recognition.wake_phrases = phrases
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        config.source = ConfigSource::Env;
    }
    if let Some(listen) = env("LILY_LISTEN") {
        config.listen_enabled = parse_flag(&listen);
        config.source = ConfigSource::Env;
    }

    // Speech
    if let Some(speech) = env("LILY_SPEECH") {
        config.speech_enabled = parse_flag(&speech);
        config.source = ConfigSource::Env;
    }

    // Store
    if let Some(path) = env("LILY_STORE_PATH") {
        config.store_path = Some(PathBuf::from(path));
        config.source = ConfigSource::Env;
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
///
/// Use this after [`load_config`] to apply command-line argument overrides.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Base URL override
    pub base_url: Option<String>,

    /// API key override
    pub api_key: Option<String>,

    /// Language override
    pub language: Option<String>,

    /// Store path override
    pub store_path: Option<PathBuf>,

    /// Recognition enabled override
    pub listen_enabled: Option<bool>,

    /// Speech enabled override
    pub speech_enabled: Option<bool>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set base URL override
    #[must_use]
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = Some(base_url);
        self
    }

    /// Set API key override
    #[must_use]
    pub fn with_api_key(mut self, api_key: String) -> Self {
        self.api_key = Some(api_key);
        self
    }

    /// Set language override
    #[must_use]
    pub fn with_language(mut self, language: String) -> Self {
        self.language = Some(language);
        self
    }

    /// Set store path override
    #[must_use]
    pub fn with_store_path(mut self, path: PathBuf) -> Self {
        self.store_path = Some(path);
        self
    }

    /// Set recognition enabled override
    #[must_use]
    pub fn with_listen_enabled(mut self, enabled: bool) -> Self {
        self.listen_enabled = Some(enabled);
        self
    }

    /// Set speech enabled override
    #[must_use]
    pub fn with_speech_enabled(mut self, enabled: bool) -> Self {
        self.speech_enabled = Some(enabled);
        self
    }

    fn is_empty(&self) -> bool {
        self.base_url.is_none()
            && self.api_key.is_none()
            && self.language.is_none()
            && self.store_path.is_none()
            && self.listen_enabled.is_none()
            && self.speech_enabled.is_none()
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut LilyConfig) {
        if self.is_empty() {
            return;
        }
        config.source = ConfigSource::Cli;

        if let Some(ref base_url) = self.base_url {
            config.remote_endpoint.base_url = base_url.clone();
        }
        if let Some(ref api_key) = self.api_key {
            config.remote_endpoint.api_key = api_key.clone();
        }
        if let Some(ref language) = self.language {
            config.conductor.language = Some(language.clone());
        }
        if let Some(ref path) = self.store_path {
            config.store_path = Some(path.clone());
        }
        if let Some(enabled) = self.listen_enabled {
            config.listen_enabled = enabled;
        }
        if let Some(enabled) = self.speech_enabled {
            config.speech_enabled = enabled;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
