use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::pipeline::PipelineOptions;
use crate::utils::RetryPolicy;

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "nomic-embed-text";
pub const DEFAULT_DIMENSION: u32 = 768;

const ENV_PROVIDER: &str = "EMBATCH_PROVIDER";
const ENV_URL: &str = "EMBATCH_URL";
const ENV_MODEL: &str = "EMBATCH_MODEL";
const ENV_API_KEY: &str = "EMBATCH_API_KEY";
const ENV_OPENAI_API_KEY: &str = "OPENAI_API_KEY";
const ENV_DIMENSION: &str = "EMBATCH_DIMENSION";

/// Which wire format the configured endpoint speaks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Ollama,
    OpenAi,
}

impl ProviderKind {
    pub fn default_url(self) -> &'static str {
        match self {
            ProviderKind::Ollama => DEFAULT_OLLAMA_URL,
            ProviderKind::OpenAi => DEFAULT_OPENAI_URL,
        }
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ollama" => Ok(ProviderKind::Ollama),
            "openai" | "open-ai" => Ok(ProviderKind::OpenAi),
            _ => Err(format!("unknown provider: {}", s)),
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderKind::Ollama => write!(f, "ollama"),
            ProviderKind::OpenAi => write!(f, "openai"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub provider: ProviderConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,
}

impl Config {
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("embatch").join("config.toml"))
    }

    /// Defaults, then the global config file, then environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path)?,
            _ => Self::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self) -> Result<PathBuf, ConfigError> {
        let path = Self::config_path().ok_or_else(|| {
            ConfigError::PathError("could not determine config directory".to_string())
        })?;
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Write a default config to the global path.
    pub fn init_global(force: bool) -> Result<PathBuf, ConfigError> {
        let path = Self::config_path().ok_or_else(|| {
            ConfigError::PathError("could not determine config directory".to_string())
        })?;
        if path.exists() && !force {
            return Err(ConfigError::PathError(format!(
                "config already exists at {}",
                path.display()
            )));
        }
        Self::default().save_to(&path)?;
        Ok(path)
    }

    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(kind) = lookup(ENV_PROVIDER) {
            let kind: ProviderKind = kind.parse().map_err(ConfigError::ValidationError)?;
            if kind != self.provider.kind && self.provider.url == self.provider.kind.default_url()
            {
                self.provider.url = kind.default_url().to_string();
            }
            self.provider.kind = kind;
        }
        if let Some(url) = lookup(ENV_URL) {
            self.provider.url = url;
        }
        if let Some(model) = lookup(ENV_MODEL) {
            self.provider.model = model;
        }
        if let Some(key) = lookup(ENV_API_KEY) {
            self.provider.api_key = Some(key);
        } else if self.provider.kind == ProviderKind::OpenAi
            && self.provider.api_key.is_none()
            && let Some(key) = lookup(ENV_OPENAI_API_KEY)
        {
            self.provider.api_key = Some(key);
        }
        if let Some(dimension) = lookup(ENV_DIMENSION) {
            self.provider.dimension = dimension.trim().parse().map_err(|_| {
                ConfigError::ValidationError(format!(
                    "{ENV_DIMENSION} must be a positive integer, got {dimension:?}"
                ))
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.provider.dimension == 0 {
            return Err(ConfigError::ValidationError(
                "provider.dimension must be at least 1".to_string(),
            ));
        }
        if self.provider.url.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "provider.url must not be empty".to_string(),
            ));
        }
        self.pipeline.validate()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub kind: ProviderKind,

    #[serde(default = "default_url")]
    pub url: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Vector size the model produces; also sizes placeholder vectors.
    #[serde(default = "default_dimension")]
    pub dimension: u32,

    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_url() -> String {
    DEFAULT_OLLAMA_URL.to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_dimension() -> u32 {
    DEFAULT_DIMENSION
}

fn default_timeout() -> u64 {
    120
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::default(),
            url: default_url(),
            model: default_model(),
            api_key: None,
            dimension: default_dimension(),
            timeout_secs: default_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: u32,

    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: u32,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    #[serde(default = "default_gate_timeout_secs")]
    pub gate_timeout_secs: u64,
}

fn default_max_batch_size() -> u32 {
    16
}

fn default_max_concurrent_requests() -> u32 {
    3
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    1_000
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_gate_timeout_secs() -> u64 {
    600
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
            max_concurrent_requests: default_max_concurrent_requests(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            gate_timeout_secs: default_gate_timeout_secs(),
        }
    }
}

impl PipelineConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries)
            .with_initial_delay(Duration::from_millis(self.initial_backoff_ms))
            .with_max_delay(Duration::from_millis(self.max_backoff_ms))
    }

    pub fn gate_timeout(&self) -> Duration {
        Duration::from_secs(self.gate_timeout_secs)
    }

    pub fn options(&self) -> PipelineOptions {
        PipelineOptions {
            max_batch_size: self.max_batch_size as usize,
            max_concurrency: self.max_concurrent_requests as usize,
            retry: self.retry_policy(),
            gate_timeout: self.gate_timeout(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_batch_size == 0 {
            return Err(ConfigError::ValidationError(
                "pipeline.max_batch_size must be at least 1".to_string(),
            ));
        }
        if self.max_concurrent_requests == 0 {
            return Err(ConfigError::ValidationError(
                "pipeline.max_concurrent_requests must be at least 1".to_string(),
            ));
        }
        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err(ConfigError::ValidationError(
                "pipeline.initial_backoff_ms must not exceed pipeline.max_backoff_ms".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.provider.kind, ProviderKind::Ollama);
        assert_eq!(config.provider.url, DEFAULT_OLLAMA_URL);
        assert_eq!(config.provider.dimension, DEFAULT_DIMENSION);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_path() {
        let path = Config::config_path();
        assert!(path.is_some());
    }

    #[test]
    fn test_pipeline_config_default() {
        let config = PipelineConfig::default();
        assert_eq!(config.max_concurrent_requests, 3);
        assert_eq!(config.max_retries, 3);

        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts(), 4);
        assert_eq!(policy.initial_delay, Duration::from_secs(1));
        assert_eq!(policy.max_delay, Duration::from_secs(30));
        assert_eq!(config.gate_timeout(), Duration::from_secs(600));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [provider]
            kind = "openai"
            model = "text-embedding-3-small"
            dimension = 1536

            [pipeline]
            max_batch_size = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.provider.kind, ProviderKind::OpenAi);
        assert_eq!(config.provider.dimension, 1536);
        assert_eq!(config.pipeline.max_batch_size, 5);
        assert_eq!(config.pipeline.max_retries, 3);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.pipeline.max_batch_size = 7;
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.pipeline.max_batch_size, 7);
        assert!(loaded.provider.api_key.is_none());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_env_overrides(env(&[
                ("EMBATCH_PROVIDER", "openai"),
                ("EMBATCH_MODEL", "text-embedding-3-small"),
                ("OPENAI_API_KEY", "sk-test"),
                ("EMBATCH_DIMENSION", "1536"),
            ]))
            .unwrap();

        assert_eq!(config.provider.kind, ProviderKind::OpenAi);
        assert_eq!(config.provider.url, DEFAULT_OPENAI_URL);
        assert_eq!(config.provider.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.provider.dimension, 1536);
    }

    #[test]
    fn test_env_override_keeps_custom_url() {
        let mut config = Config::default();
        config.provider.url = "http://gpu-box:11434".to_string();
        config
            .apply_env_overrides(env(&[("EMBATCH_PROVIDER", "openai")]))
            .unwrap();
        assert_eq!(config.provider.url, "http://gpu-box:11434");
    }

    #[test]
    fn test_env_override_rejects_bad_dimension() {
        let mut config = Config::default();
        let result = config.apply_env_overrides(env(&[("EMBATCH_DIMENSION", "wide")]));
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_validation() {
        let mut config = Config::default();
        config.pipeline.max_batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.pipeline.initial_backoff_ms = 60_000;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.provider.dimension = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_provider_kind_parse() {
        assert_eq!("OpenAI".parse::<ProviderKind>().unwrap(), ProviderKind::OpenAi);
        assert_eq!("ollama".parse::<ProviderKind>().unwrap(), ProviderKind::Ollama);
        assert!("cohere".parse::<ProviderKind>().is_err());
        assert_eq!(ProviderKind::OpenAi.to_string(), "openai");
    }
}
