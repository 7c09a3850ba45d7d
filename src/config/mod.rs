pub mod defaults;
pub mod validation;

use serde::{Deserialize, Serialize};
use std::fmt;

use self::validation::validate_config;

/// Environment variable that overrides `upstream.api_key` when set.
pub const API_KEY_ENV: &str = "TUTOR_RELAY_API_KEY";

/// Error type for configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Known JSON shapes of a streamed text delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaShape {
    /// `{"choices":[{"delta":{"content":"..."}}]}`
    OpenAiChat,
    /// `{"delta":{"text":"..."}}`
    DeltaText,
}

impl fmt::Display for DeltaShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeltaShape::OpenAiChat => write!(f, "open_ai_chat"),
            DeltaShape::DeltaText => write!(f, "delta_text"),
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "defaults::port")]
    pub port: u16,
    #[serde(default = "defaults::host")]
    pub host: String,
    #[serde(default)]
    pub base_path: String,
    /// Timeout in seconds for non-streaming upstream calls.
    #[serde(default = "defaults::timeout")]
    pub timeout: u64,
    #[serde(default = "defaults::http_pool_max_idle_per_host")]
    pub http_pool_max_idle_per_host: usize,
    #[serde(default = "defaults::http_pool_idle_timeout_secs")]
    pub http_pool_idle_timeout_secs: u64,
    #[serde(default)]
    pub http_use_env_proxy: bool,
    #[serde(default = "defaults::max_body_bytes")]
    pub max_body_bytes: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_worker_threads: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: defaults::port(),
            host: defaults::host(),
            base_path: String::new(),
            timeout: defaults::timeout(),
            http_pool_max_idle_per_host: defaults::http_pool_max_idle_per_host(),
            http_pool_idle_timeout_secs: defaults::http_pool_idle_timeout_secs(),
            http_use_env_proxy: false,
            max_body_bytes: defaults::max_body_bytes(),
            runtime_worker_threads: None,
        }
    }
}

/// Token budgets per kind of tutor call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaxTokensConfig {
    #[serde(default = "defaults::max_tokens_general")]
    pub general: u32,
    #[serde(default = "defaults::max_tokens_tutor")]
    pub tutor: u32,
    #[serde(default = "defaults::max_tokens_image")]
    pub image_recognition: u32,
}

impl Default for MaxTokensConfig {
    fn default() -> Self {
        Self {
            general: defaults::max_tokens_general(),
            tutor: defaults::max_tokens_tutor(),
            image_recognition: defaults::max_tokens_image(),
        }
    }
}

/// The text-generation API the tutor talks to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    pub model: String,
    #[serde(default = "defaults::anthropic_version")]
    pub anthropic_version: String,
    #[serde(default)]
    pub proxy: Option<String>,
    #[serde(default)]
    pub max_tokens: MaxTokensConfig,
    #[serde(default = "defaults::delta_shapes")]
    pub delta_shapes: Vec<DeltaShape>,
    /// Seconds without any upstream bytes before a stream is abandoned.
    #[serde(default = "defaults::stream_idle_timeout_secs")]
    pub stream_idle_timeout_secs: u64,
}

/// System prompts for each tutor surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemPrompts {
    #[serde(default = "defaults::homepage_prompt")]
    pub homepage: String,
    #[serde(default = "defaults::course_tutor_prompt")]
    pub course_tutor: String,
    #[serde(default = "defaults::canvas_coding_prompt")]
    pub canvas_coding: String,
    #[serde(default = "defaults::image_recognition_prompt")]
    pub image_recognition: String,
}

impl Default for SystemPrompts {
    fn default() -> Self {
        Self {
            homepage: defaults::homepage_prompt(),
            course_tutor: defaults::course_tutor_prompt(),
            canvas_coding: defaults::canvas_coding_prompt(),
            image_recognition: defaults::image_recognition_prompt(),
        }
    }
}

/// Tutor behaviour: prompts, encouragement phrases, history window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TutorConfig {
    #[serde(default)]
    pub system_prompts: SystemPrompts,
    #[serde(default = "defaults::encouragements")]
    pub encouragements: Vec<String>,
    #[serde(default = "defaults::history_limit")]
    pub history_limit: usize,
}

impl Default for TutorConfig {
    fn default() -> Self {
        Self {
            system_prompts: SystemPrompts::default(),
            encouragements: defaults::encouragements(),
            history_limit: defaults::history_limit(),
        }
    }
}

/// Feature flags and settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesConfig {
    #[serde(default = "defaults::log_level")]
    pub log_level: String,
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            log_level: defaults::log_level(),
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub tutor: TutorConfig,
    #[serde(default)]
    pub features: FeaturesConfig,
}

/// Load configuration from a YAML file, apply environment overrides and
/// validate it.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] when reading the file fails, [`ConfigError::Yaml`]
/// when parsing fails, or [`ConfigError::Validation`] when semantic validation fails.
pub fn load_config(path: &str) -> Result<AppConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    let mut config = parse_config(&contents)?;
    if let Ok(key) = std::env::var(API_KEY_ENV) {
        if !key.trim().is_empty() {
            config.upstream.api_key = key;
        }
    }
    validate_config(&config)?;
    Ok(config)
}

/// Parse configuration YAML without environment overrides or validation.
///
/// # Errors
///
/// Returns [`ConfigError::Yaml`] when the document does not match the schema.
pub fn parse_config(contents: &str) -> Result<AppConfig, ConfigError> {
    Ok(serde_yaml::from_str(contents)?)
}
