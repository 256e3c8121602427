//! Runtime configuration.
//!
//! Configuration is deserialized from YAML (or built programmatically) and
//! validated before any provider is constructed. API keys live in
//! [`SecretString`] so a stray `{:?}` never leaks them into logs.

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::resilience::{CircuitBreakerConfig, RetryConfig};

/// Serde helper: `Duration` as integer seconds.
pub mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

/// Errors from configuration loading and validation.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("temperature {0} outside [0, 2]")]
    TemperatureOutOfRange(f32),

    #[error("model name must not be empty")]
    EmptyModel,

    #[error("provider kind must not be empty")]
    EmptyProvider,

    #[error("max_attempts must be at least 1")]
    ZeroAttempts,

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_temperature() -> f32 {
    0.7
}

/// Per-provider model configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    /// API key for authenticated providers. Local providers omit it.
    #[serde(default)]
    pub api_key: Option<SecretString>,

    /// Model identifier sent to the provider.
    pub model: String,

    /// Maximum tokens to generate.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Per-call deadline, layered on top of caller cancellation.
    #[serde(
        with = "duration_secs",
        rename = "timeout_seconds",
        default = "default_timeout"
    )]
    pub timeout: Duration,

    /// Endpoint override. Each adapter supplies its own default.
    #[serde(default)]
    pub base_url: Option<String>,

    /// Sampling temperature in `[0, 2]`.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Provider kind this configuration belongs to (catalog key).
    pub provider: String,
}

impl ModelConfig {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: None,
            model: model.into(),
            max_tokens: default_max_tokens(),
            timeout: default_timeout(),
            base_url: None,
            temperature: default_temperature(),
            provider: provider.into(),
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(SecretString::from(key.into()));
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// The key material, when configured and non-empty.
    pub fn api_key(&self) -> Option<&str> {
        self.api_key
            .as_ref()
            .map(|key| key.expose_secret())
            .filter(|key| !key.is_empty())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.provider.trim().is_empty() {
            return Err(ConfigError::EmptyProvider);
        }
        if self.model.trim().is_empty() {
            return Err(ConfigError::EmptyModel);
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::TemperatureOutOfRange(self.temperature));
        }
        Ok(())
    }
}

fn default_max_attempts() -> u32 {
    3
}

/// Top-level runtime configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    /// Outer retry budget for a whole pipeline pass.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub providers: Vec<ModelConfig>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            circuit_breaker: CircuitBreakerConfig::default(),
            retry: RetryConfig::default(),
            providers: Vec::new(),
        }
    }
}

impl RuntimeConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&yaml)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::ZeroAttempts);
        }
        for provider in &self.providers {
            provider.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_config_defaults() {
        let config = ModelConfig::new("anthropic", "claude-sonnet-4-5");
        assert_eq!(config.max_tokens, 1024);
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert!(config.api_key().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_temperature_bounds() {
        let config = ModelConfig::new("openai", "gpt-4o").with_temperature(2.5);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::TemperatureOutOfRange(_))
        ));
    }

    #[test]
    fn test_empty_model_rejected() {
        let config = ModelConfig::new("openai", "");
        assert!(matches!(config.validate(), Err(ConfigError::EmptyModel)));
    }

    #[test]
    fn test_api_key_not_in_debug_output() {
        let config = ModelConfig::new("openai", "gpt-4o").with_api_key("sk-very-secret");
        let printed = format!("{config:?}");
        assert!(!printed.contains("sk-very-secret"));
        assert_eq!(config.api_key(), Some("sk-very-secret"));
    }

    #[test]
    fn test_empty_api_key_counts_as_unconfigured() {
        let config = ModelConfig::new("openai", "gpt-4o").with_api_key("");
        assert!(config.api_key().is_none());
    }

    #[test]
    fn test_runtime_config_from_yaml() {
        let yaml = r#"
max_attempts: 2
circuit_breaker:
  failure_threshold: 4
  open_duration: 120
  half_open_success_threshold: 1
  enabled: true
retry:
  type: fixed_delay
  delay_seconds: 1
  max_attempts: 2
providers:
  - provider: anthropic
    model: claude-sonnet-4-5
    api_key: test-key
    timeout_seconds: 20
  - provider: ollama
    model: llama3
    base_url: http://localhost:11434
"#;
        let config = RuntimeConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.max_attempts, 2);
        assert_eq!(config.circuit_breaker.failure_threshold, 4);
        assert_eq!(config.providers.len(), 2);
        assert_eq!(config.providers[0].timeout, Duration::from_secs(20));
        assert_eq!(config.providers[1].provider, "ollama");
    }

    #[test]
    fn test_invalid_yaml_provider_rejected() {
        let yaml = r#"
providers:
  - provider: anthropic
    model: claude-sonnet-4-5
    temperature: 3.0
"#;
        assert!(RuntimeConfig::from_yaml(yaml).is_err());
    }
}
