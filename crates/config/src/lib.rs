//! Configuration loading, validation, and management for Toolstream.
//!
//! Loads configuration from `~/.toolstream/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.toolstream/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the model endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL of the OpenAI-compatible endpoint
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Default model
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Default temperature
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Orchestrator settings
    #[serde(default)]
    pub agent: AgentConfig,

    /// Gateway configuration
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Web search tool configuration
    #[serde(default)]
    pub search: SearchConfig,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.0
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
            .field("base_url", &self.base_url)
            .field("default_model", &self.default_model)
            .field("default_temperature", &self.default_temperature)
            .field("agent", &self.agent)
            .field("gateway", &self.gateway)
            .field("search", &self.search)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Non-terminal iterations before the final answer is forced
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Wall-clock limit for one tool invocation
    #[serde(default = "default_iteration_timeout_secs")]
    pub iteration_timeout_secs: u64,

    /// Frames buffered between the orchestrator and the response writer
    #[serde(default = "default_stream_buffer")]
    pub stream_buffer: usize,
}

fn default_max_iterations() -> u32 {
    3
}
fn default_iteration_timeout_secs() -> u64 {
    30
}
fn default_stream_buffer() -> usize {
    64
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            iteration_timeout_secs: default_iteration_timeout_secs(),
            stream_buffer: default_stream_buffer(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    /// Browser origins allowed by CORS
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
}

fn default_port() -> u16 {
    8000
}
fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_allowed_origins() -> Vec<String> {
    vec!["http://localhost:5173".into()]
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            allowed_origins: default_allowed_origins(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// SerpAPI key; the web search tool fails without one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_search_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_search_engine")]
    pub engine: String,
}

fn default_search_endpoint() -> String {
    "https://serpapi.com/search".into()
}
fn default_search_engine() -> String {
    "google".into()
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: default_search_endpoint(),
            engine: default_search_engine(),
        }
    }
}

impl std::fmt::Debug for SearchConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchConfig")
            .field("api_key", &redact(&self.api_key))
            .field("endpoint", &self.endpoint)
            .field("engine", &self.engine)
            .finish()
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.toolstream/config.toml).
    ///
    /// Environment variables override the file:
    /// - `TOOLSTREAM_API_KEY`, then `OPENAI_API_KEY`
    /// - `TOOLSTREAM_MODEL`, `TOOLSTREAM_BASE_URL`
    /// - `SERPAPI_API_KEY`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
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

    /// Apply environment overrides through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup("TOOLSTREAM_API_KEY").or_else(|| lookup("OPENAI_API_KEY")) {
            self.api_key = Some(key);
        }
        if let Some(model) = lookup("TOOLSTREAM_MODEL") {
            self.default_model = model;
        }
        if let Some(url) = lookup("TOOLSTREAM_BASE_URL") {
            self.base_url = url;
        }
        if let Some(key) = lookup("SERPAPI_API_KEY") {
            self.search.api_key = Some(key);
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".toolstream")
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
        if self.agent.iteration_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "agent.iteration_timeout_secs must be at least 1".into(),
            ));
        }
        if self.agent.stream_buffer == 0 {
            return Err(ConfigError::ValidationError(
                "agent.stream_buffer must be at least 1".into(),
            ));
        }
        if self.gateway.port == 0 {
            return Err(ConfigError::ValidationError(
                "gateway.port must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Render the configuration as TOML with secrets removed.
    pub fn redacted_toml(&self) -> String {
        let mut copy = self.clone();
        copy.api_key = copy.api_key.map(|_| "[REDACTED]".into());
        copy.search.api_key = copy.search.api_key.map(|_| "[REDACTED]".into());
        toml::to_string_pretty(&copy).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            default_model: default_model(),
            default_temperature: default_temperature(),
            agent: AgentConfig::default(),
            gateway: GatewayConfig::default(),
            search: SearchConfig::default(),
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
