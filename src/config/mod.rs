//! Configuration management for Presage
//!
//! Every tunable that shapes speculation behavior (confidence threshold,
//! similarity threshold, cache TTLs) lives here as a named field rather
//! than an inline literal, so operators can tune the gate without a rebuild.

use crate::error::{PresageError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

mod validator;

pub use validator::ConfigValidator;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    pub storage: StorageConfig,
    pub daemon: DaemonConfig,
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    pub index: IndexConfig,
    pub cache: CacheConfig,
    pub prediction: PredictionConfig,
    #[serde(default)]
    pub profiles: HashMap<String, ProfileOverrides>,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
    #[serde(default = "current_timestamp")]
    pub last_modified: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

/// Daemon configuration for process and IPC management
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    pub socket_path: PathBuf,
    pub pid_file: PathBuf,
    pub log_file: PathBuf,
    pub max_connections: usize,
}

/// Generation capability (LLM) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub enabled: bool,
    pub base_url: String,
    pub api_key_env: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub model: String,
    pub batch_size: usize,
}

/// Vector index configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    pub vector_dim: usize,
    /// Default number of results returned by a retrieval query
    pub top_k: usize,
    /// Results scoring below this similarity are dropped from retrieval
    pub similarity_threshold: f32,
}

/// Cache TTLs per entry kind, in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub enabled: bool,
    pub prediction_ttl_secs: i64,
    pub answer_ttl_secs: i64,
    pub retrieval_ttl_secs: i64,
}

/// Prediction and speculation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionConfig {
    /// Master switch for speculative answer generation
    pub speculate_enabled: bool,
    /// Minimum predictor confidence required to generate and cache an answer
    pub confidence_threshold: f32,
    /// How many trailing messages the predictor sees
    pub max_messages: usize,
    /// Word-overlap score an incoming question must exceed to be served a
    /// cached speculative answer
    pub match_overlap_threshold: f32,
}

/// Profile-specific configuration overrides
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speculate_enabled: Option<bool>,
}

impl Config {
    /// Load a configuration file, apply env overrides, and validate.
    ///
    /// A missing file is reported as `ConfigNotFound` so callers can fall
    /// back to defaults or suggest `config init`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PresageError::ConfigNotFound {
                    path: path.to_path_buf(),
                });
            }
            Err(e) => {
                return Err(PresageError::Io {
                    source: e,
                    context: format!("Failed to read config file: {:?}", path),
                });
            }
        };

        let mut config: Config = toml::from_str(&content)?;
        config.apply_env_overrides();
        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Write the configuration out as pretty TOML
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| PresageError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })
    }

    /// Load configuration with a specific profile applied
    pub fn load_with_profile(path: &Path, profile: &str) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_profile(profile);
        Ok(config)
    }

    /// Apply a profile's overrides. An unknown profile name is a no-op.
    pub fn apply_profile(&mut self, profile: &str) {
        let Some(overrides) = self.profiles.get(profile) else {
            return;
        };
        if let Some(enabled) = overrides.llm_enabled {
            self.llm.enabled = enabled;
        }
        if let Some(model) = &overrides.embedding_model {
            self.embedding.model = model.clone();
        }
        if let Some(enabled) = overrides.speculate_enabled {
            self.prediction.speculate_enabled = enabled;
        }
    }

    /// Apply `PRESAGE_SECTION__KEY=value` environment overrides
    pub fn apply_env_overrides(&mut self) {
        for (key, value) in std::env::vars() {
            if let Some(config_key) = key.strip_prefix("PRESAGE_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "LLM__ENABLED" => self.llm.enabled = parse_env(path, value)?,
            "LLM__MODEL" => self.llm.model = value.to_string(),
            "LLM__BASE_URL" => self.llm.base_url = value.to_string(),
            "EMBEDDING__MODEL" => self.embedding.model = value.to_string(),
            "PREDICTION__SPECULATE_ENABLED" => {
                self.prediction.speculate_enabled = parse_env(path, value)?;
            }
            "PREDICTION__CONFIDENCE_THRESHOLD" => {
                self.prediction.confidence_threshold = parse_env(path, value)?;
            }
            "CACHE__ENABLED" => self.cache.enabled = parse_env(path, value)?,
            _ => tracing::debug!("Unknown env config key: {}", path),
        }
        Ok(())
    }

    /// Default configuration file path (`~/.config/presage/config.toml`)
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| PresageError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("presage").join("config.toml"))
    }
}

fn parse_env<T: std::str::FromStr>(path: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| PresageError::InvalidConfigValue {
        path: path.to_string(),
        message: format!("Cannot parse '{}'", value),
    })
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = PathBuf::from("~/.presage");

        Self {
            meta: MetaConfig {
                schema_version: "1.0.0".to_string(),
                created_at: current_timestamp(),
                last_modified: current_timestamp(),
            },
            storage: StorageConfig {
                data_dir: data_dir.clone(),
            },
            daemon: DaemonConfig {
                socket_path: data_dir.join("daemon.sock"),
                pid_file: data_dir.join("daemon.pid"),
                log_file: data_dir.join("logs").join("daemon.log"),
                max_connections: 32,
            },
            llm: LlmConfig {
                enabled: false,
                base_url: "https://api.openai.com/v1".to_string(),
                api_key_env: "OPENAI_API_KEY".to_string(),
                model: "gpt-4o".to_string(),
                temperature: 0.7,
                max_tokens: 1000,
                timeout_secs: 60,
            },
            embedding: EmbeddingConfig {
                model: "all-MiniLM-L6-v2".to_string(),
                batch_size: 32,
            },
            index: IndexConfig {
                vector_dim: 384,
                top_k: 5,
                similarity_threshold: 0.7,
            },
            cache: CacheConfig {
                enabled: true,
                prediction_ttl_secs: 3600,
                answer_ttl_secs: 7200,
                retrieval_ttl_secs: 1800,
            },
            prediction: PredictionConfig {
                speculate_enabled: true,
                confidence_threshold: 0.8,
                max_messages: 5,
                match_overlap_threshold: 0.6,
            },
            profiles: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_roundtrip() {
        let config = Config::default();
        let toml = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&toml).unwrap();
        assert_eq!(parsed.prediction.confidence_threshold, 0.8);
        assert_eq!(parsed.cache.answer_ttl_secs, 7200);
        assert_eq!(parsed.index.similarity_threshold, 0.7);
    }

    #[test]
    fn test_apply_profile() {
        let mut config = Config::default();
        config.profiles.insert(
            "offline".to_string(),
            ProfileOverrides {
                llm_enabled: Some(false),
                embedding_model: None,
                speculate_enabled: Some(false),
            },
        );

        config.apply_profile("offline");
        assert!(!config.llm.enabled);
        assert!(!config.prediction.speculate_enabled);

        // Unknown profiles change nothing
        config.apply_profile("no-such-profile");
        assert!(!config.llm.enabled);
    }
}
