//! Runtime configuration, read from an optional JSON file

use crate::summary::processor::{DEFAULT_MAX_CHUNK_COST, DEFAULT_MIN_LENGTH, DEFAULT_TARGET_LENGTH};
use crate::summary::tokens::{EstimatorKind, LengthEstimator};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Environment variable consulted when no API key is configured
pub const API_KEY_ENV: &str = "MEETING_SUMMARIZER_API_KEY";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// "ollama", "openai", "claude", "groq" or "openrouter"
    pub provider: String,
    pub model: String,
    /// Overrides the provider's default base URL
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub request_timeout_secs: u64,
    /// Input budget per chunk, in estimator units
    pub max_chunk_cost: usize,
    pub target_length: usize,
    pub min_length: usize,
    /// Output token cap for extraction calls
    pub extraction_max_tokens: u32,
    pub estimator: EstimatorKind,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".to_string(),
            model: "llama3.2:latest".to_string(),
            endpoint: None,
            api_key: None,
            request_timeout_secs: 1800,
            max_chunk_cost: DEFAULT_MAX_CHUNK_COST,
            target_length: DEFAULT_TARGET_LENGTH,
            min_length: DEFAULT_MIN_LENGTH,
            extraction_max_tokens: 1024,
            estimator: EstimatorKind::default(),
        }
    }
}

impl AppConfig {
    /// Reads `path` if given, otherwise uses defaults. The API key falls back
    /// to [`API_KEY_ENV`]. The result is validated.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
                info!("Loaded config from {}", path.display());
                Self::from_json_str(&content)?
            }
            None => {
                debug!("No config file given, using defaults");
                Self::default()
            }
        };

        config.fill_api_key(std::env::var(API_KEY_ENV).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parses without validating; missing fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Uses `env_value` only when no non-empty key is configured
    pub fn fill_api_key(&mut self, env_value: Option<String>) {
        let missing = self.api_key.as_deref().map_or(true, str::is_empty);
        if missing {
            if let Some(key) = env_value.filter(|k| !k.trim().is_empty()) {
                debug!("Using API key from {}", API_KEY_ENV);
                self.api_key = Some(key);
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.provider.trim().is_empty() {
            return Err(ConfigError::Invalid("provider cannot be empty".to_string()));
        }
        if self.model.trim().is_empty() {
            return Err(ConfigError::Invalid("model cannot be empty".to_string()));
        }
        if self.max_chunk_cost == 0 {
            return Err(ConfigError::Invalid(
                "max_chunk_cost must be greater than zero".to_string(),
            ));
        }
        if self.target_length == 0 {
            return Err(ConfigError::Invalid(
                "target_length must be greater than zero".to_string(),
            ));
        }
        if self.min_length > self.target_length {
            return Err(ConfigError::Invalid(format!(
                "min_length ({}) cannot exceed target_length ({})",
                self.min_length, self.target_length
            )));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "request_timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn estimator(&self) -> LengthEstimator {
        LengthEstimator::from_kind(self.estimator)
    }
}
