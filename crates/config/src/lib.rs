//! Configuration loading, validation, and management for chronicle.
//!
//! Loads configuration from `~/.chronicle/config.toml` with environment
//! variable overrides. Validates all settings at startup.
//!
//! Every threshold the relevance gate uses lives in [`RelevancePolicy`] so it
//! can be tuned without touching code.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Upper bound for `memory.retention_days` and `purge --days`.
pub const MAX_RETENTION_DAYS: u32 = 36_500;

/// The root configuration structure.
///
/// Maps directly to `~/.chronicle/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the OpenAI-compatible endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL of the chat-completions API
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Model that writes the assistant's replies
    #[serde(default = "default_generation_model")]
    pub generation_model: String,

    /// Small model that classifies relevance
    #[serde(default = "default_classification_model")]
    pub classification_model: String,

    /// Temperature for generation
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Max tokens per generated reply
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default)]
    pub memory: MemoryConfig,

    #[serde(default)]
    pub relevance: RelevancePolicy,

    #[serde(default)]
    pub agent: AgentSettings,
}

fn default_api_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_generation_model() -> String {
    "gpt-4.1-mini".into()
}
fn default_classification_model() -> String {
    "gpt-4.1-nano".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    1024
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
            .field("api_url", &self.api_url)
            .field("generation_model", &self.generation_model)
            .field("classification_model", &self.classification_model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("memory", &self.memory)
            .field("relevance", &self.relevance)
            .field("agent", &self.agent)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// SQLite file holding the timeline
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Default for `purge` when no `--days` is given
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

fn default_database_path() -> String {
    AppConfig::config_dir()
        .join("timeline.db")
        .to_string_lossy()
        .into_owned()
}
fn default_retention_days() -> u32 {
    30
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            retention_days: default_retention_days(),
        }
    }
}

/// Tunables for the relevance gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelevancePolicy {
    /// Entries shown to the classifier in the activity digest
    #[serde(default = "default_digest_entries")]
    pub digest_entries: usize,

    #[serde(default = "default_window_hours")]
    pub digest_window_hours: u32,

    /// Entries fetched before the digest keeps its tail
    #[serde(default = "default_digest_fetch_limit")]
    pub digest_fetch_limit: usize,

    #[serde(default = "default_digest_message_chars")]
    pub digest_message_chars: usize,

    /// Lookback used when the classifier suggests none
    #[serde(default = "default_window_hours")]
    pub default_timeframe_hours: u32,

    #[serde(default = "default_context_fetch_limit")]
    pub context_fetch_limit: usize,

    #[serde(default = "default_context_render_limit")]
    pub context_render_limit: usize,

    /// Below this many keyword hits the keyword filter is dropped
    #[serde(default = "default_keyword_min_matches")]
    pub keyword_min_matches: usize,

    /// Confidence when the classifier reply had to be scanned as free text
    #[serde(default = "default_heuristic_confidence")]
    pub heuristic_confidence: f64,

    #[serde(default = "default_high_confidence")]
    pub high_confidence: f64,

    #[serde(default = "default_low_confidence")]
    pub low_confidence: f64,

    /// Confidence when the classifier could not be reached at all
    #[serde(default = "default_local_fallback_confidence")]
    pub local_fallback_confidence: f64,

    /// Gated context is injected only strictly above this confidence
    #[serde(default = "default_injection_min_confidence")]
    pub injection_min_confidence: f64,

    #[serde(default = "default_classification_timeout_secs")]
    pub classification_timeout_secs: u64,

    #[serde(default = "default_classifier_temperature")]
    pub classifier_temperature: f32,

    #[serde(default = "default_classifier_max_tokens")]
    pub classifier_max_tokens: u32,

    /// Phrases in the user message that count as a reference to history
    #[serde(default = "default_strong_indicators")]
    pub strong_indicators: Vec<String>,
}

fn default_digest_entries() -> usize {
    5
}
fn default_window_hours() -> u32 {
    24
}
fn default_digest_fetch_limit() -> usize {
    10
}
fn default_digest_message_chars() -> usize {
    100
}
fn default_context_fetch_limit() -> usize {
    50
}
fn default_context_render_limit() -> usize {
    20
}
fn default_keyword_min_matches() -> usize {
    3
}
fn default_heuristic_confidence() -> f64 {
    0.6
}
fn default_high_confidence() -> f64 {
    0.8
}
fn default_low_confidence() -> f64 {
    0.4
}
fn default_local_fallback_confidence() -> f64 {
    0.5
}
fn default_injection_min_confidence() -> f64 {
    0.6
}
fn default_classification_timeout_secs() -> u64 {
    20
}
fn default_classifier_temperature() -> f32 {
    0.1
}
fn default_classifier_max_tokens() -> u32 {
    300
}
fn default_strong_indicators() -> Vec<String> {
    [
        "previous",
        "earlier",
        "before",
        "last time",
        "remember",
        "recall",
        "you said",
        "we discussed",
        "continue",
        "status",
        "result",
        "outcome",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl Default for RelevancePolicy {
    fn default() -> Self {
        Self {
            digest_entries: default_digest_entries(),
            digest_window_hours: default_window_hours(),
            digest_fetch_limit: default_digest_fetch_limit(),
            digest_message_chars: default_digest_message_chars(),
            default_timeframe_hours: default_window_hours(),
            context_fetch_limit: default_context_fetch_limit(),
            context_render_limit: default_context_render_limit(),
            keyword_min_matches: default_keyword_min_matches(),
            heuristic_confidence: default_heuristic_confidence(),
            high_confidence: default_high_confidence(),
            low_confidence: default_low_confidence(),
            local_fallback_confidence: default_local_fallback_confidence(),
            injection_min_confidence: default_injection_min_confidence(),
            classification_timeout_secs: default_classification_timeout_secs(),
            classifier_temperature: default_classifier_temperature(),
            classifier_max_tokens: default_classifier_max_tokens(),
            strong_indicators: default_strong_indicators(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Fixed persona preamble placed in every system message
    #[serde(default = "default_persona")]
    pub persona: String,

    #[serde(default = "default_generation_timeout_secs")]
    pub generation_timeout_secs: u64,

    /// Per tool call; a tool that runs longer is recorded as timed out
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,

    /// Prefix of the reply persisted when generation fails
    #[serde(default = "default_apology_prefix")]
    pub apology_prefix: String,

    /// Window injected when the operator forces context
    #[serde(default = "default_window_hours")]
    pub force_context_hours: u32,

    #[serde(default = "default_context_render_limit")]
    pub force_context_limit: usize,
}

fn default_persona() -> String {
    "You are Friday, a smart high-tech AI assistant. You speak in a brief, clean, \
     highly efficient way. You are assistive. You use a very formal tone and \
     address the user as sir.\n\n\
     IMPORTANT: You start each conversation fresh unless relevant context is \
     provided above. You have access to functions to retrieve conversation \
     history when needed. Use them when you need to understand past \
     interactions, actions taken, or ongoing tasks."
        .into()
}
fn default_generation_timeout_secs() -> u64 {
    60
}
fn default_tool_timeout_secs() -> u64 {
    30
}
fn default_apology_prefix() -> String {
    "I apologize, sir. An error occurred:".into()
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            persona: default_persona(),
            generation_timeout_secs: default_generation_timeout_secs(),
            tool_timeout_secs: default_tool_timeout_secs(),
            apology_prefix: default_apology_prefix(),
            force_context_hours: default_window_hours(),
            force_context_limit: default_context_render_limit(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.chronicle/config.toml).
    ///
    /// Environment overrides:
    /// - `CHRONICLE_API_KEY`, then `OPENAI_API_KEY` (only if the file has no key)
    /// - `CHRONICLE_API_URL`
    /// - `CHRONICLE_MODEL` (generation model)
    /// - `CHRONICLE_DB` (database path)
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply overrides from an environment lookup.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if self.api_key.is_none() {
            self.api_key = lookup("CHRONICLE_API_KEY").or_else(|| lookup("OPENAI_API_KEY"));
        }
        if let Some(url) = lookup("CHRONICLE_API_URL") {
            self.api_url = url;
        }
        if let Some(model) = lookup("CHRONICLE_MODEL") {
            self.generation_model = model;
        }
        if let Some(db) = lookup("CHRONICLE_DB") {
            self.memory.database_path = db;
        }
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
        dirs_home().join(".chronicle")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::ValidationError(
                "temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if !(1..=MAX_RETENTION_DAYS).contains(&self.memory.retention_days) {
            return Err(ConfigError::ValidationError(format!(
                "memory.retention_days must be between 1 and {MAX_RETENTION_DAYS}"
            )));
        }

        let policy = &self.relevance;
        let confidences = [
            ("heuristic_confidence", policy.heuristic_confidence),
            ("high_confidence", policy.high_confidence),
            ("low_confidence", policy.low_confidence),
            ("local_fallback_confidence", policy.local_fallback_confidence),
            ("injection_min_confidence", policy.injection_min_confidence),
        ];
        for (name, value) in confidences {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::ValidationError(format!(
                    "relevance.{name} must be between 0.0 and 1.0"
                )));
            }
        }

        let sizes = [
            ("digest_entries", policy.digest_entries),
            ("digest_fetch_limit", policy.digest_fetch_limit),
            ("digest_message_chars", policy.digest_message_chars),
            ("context_fetch_limit", policy.context_fetch_limit),
            ("context_render_limit", policy.context_render_limit),
        ];
        for (name, value) in sizes {
            if value == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "relevance.{name} must be greater than 0"
                )));
            }
        }

        if policy.digest_window_hours == 0 || policy.default_timeframe_hours == 0 {
            return Err(ConfigError::ValidationError(
                "relevance windows must be at least 1 hour".into(),
            ));
        }

        if policy.classification_timeout_secs == 0
            || self.agent.generation_timeout_secs == 0
            || self.agent.tool_timeout_secs == 0
        {
            return Err(ConfigError::ValidationError(
                "timeouts must be at least 1 second".into(),
            ));
        }

        if self.agent.force_context_hours == 0 || self.agent.force_context_limit == 0 {
            return Err(ConfigError::ValidationError(
                "agent.force_context_hours and agent.force_context_limit must be greater than 0"
                    .into(),
            ));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
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
            api_url: default_api_url(),
            generation_model: default_generation_model(),
            classification_model: default_classification_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            memory: MemoryConfig::default(),
            relevance: RelevancePolicy::default(),
            agent: AgentSettings::default(),
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
