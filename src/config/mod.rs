pub mod validation;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::backend::ModelKind;

use self::validation::validate_config;

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

/// What to do with a request that arrives while the model is busy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AdmissionPolicy {
    #[default]
    Queue,
    Reject,
}

impl fmt::Display for AdmissionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdmissionPolicy::Queue => write!(f, "queue"),
            AdmissionPolicy::Reject => write!(f, "reject"),
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default)]
    pub base_path: String,
    #[serde(default = "default_body_limit_bytes")]
    pub body_limit_bytes: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_worker_threads: Option<usize>,
    #[serde(
        default = "default_runtime_max_blocking_threads",
        skip_serializing_if = "Option::is_none"
    )]
    pub runtime_max_blocking_threads: Option<usize>,
    #[serde(default)]
    pub admission: AdmissionPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admission_timeout_ms: Option<u64>,
}

fn default_port() -> u16 {
    5012
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_body_limit_bytes() -> usize {
    2 * 1024 * 1024
}
#[allow(clippy::unnecessary_wraps)]
fn default_runtime_max_blocking_threads() -> Option<usize> {
    Some(8)
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            base_path: String::new(),
            body_limit_bytes: default_body_limit_bytes(),
            runtime_worker_threads: None,
            runtime_max_blocking_threads: default_runtime_max_blocking_threads(),
            admission: AdmissionPolicy::default(),
            admission_timeout_ms: None,
        }
    }
}

/// Which model backend to load and where its weights live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub kind: ModelKind,
    /// Identifier reported by `/v1/models`; defaults to the kind's display name.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub pretrained_model_path: Option<String>,
    #[serde(default)]
    pub embedding_model_path: Option<String>,
    #[serde(default)]
    pub cuda_devices: Option<String>,
    #[serde(default = "default_embedding_dim")]
    pub embedding_dim: usize,
}

fn default_embedding_dim() -> usize {
    64
}

impl ModelConfig {
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .unwrap_or_else(|| self.kind.display_name())
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            kind: ModelKind::default(),
            name: None,
            pretrained_model_path: None,
            embedding_model_path: None,
            cuda_devices: None,
            embedding_dim: default_embedding_dim(),
        }
    }
}

/// Feature flags and protocol tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Characters of output buffered before the function-call decision is taken.
    #[serde(default = "default_sniffer_threshold")]
    pub sniffer_threshold: usize,
    #[serde(default = "default_function_call_marker")]
    pub function_call_marker: String,
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,
    #[serde(default = "default_max_length")]
    pub default_max_length: u32,
}

fn default_log_level() -> String {
    "INFO".to_string()
}
fn default_sniffer_threshold() -> usize {
    7
}
fn default_function_call_marker() -> String {
    "get_".to_string()
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_max_length() -> u32 {
    2048
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            sniffer_threshold: default_sniffer_threshold(),
            function_call_marker: default_function_call_marker(),
            default_max_tokens: default_max_tokens(),
            default_max_length: default_max_length(),
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub features: FeaturesConfig,
}

/// Load configuration from a YAML file and validate it.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] when reading the file fails, [`ConfigError::Yaml`]
/// when parsing fails, or [`ConfigError::Validation`] when semantic validation fails.
pub fn load_config(path: &str) -> Result<AppConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    parse_config(&contents)
}

/// Parse and validate configuration from YAML text.
///
/// # Errors
///
/// Returns [`ConfigError::Yaml`] or [`ConfigError::Validation`].
pub fn parse_config(contents: &str) -> Result<AppConfig, ConfigError> {
    let config: AppConfig = serde_yaml::from_str(contents)?;
    validate_config(&config)?;
    Ok(config)
}
