use crate::config::Config;
use crate::error::{PresageError, Result, ValidationError};

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_storage(config, &mut errors);
        Self::validate_llm(config, &mut errors);
        Self::validate_embedding(config, &mut errors);
        Self::validate_index(config, &mut errors);
        Self::validate_cache(config, &mut errors);
        Self::validate_prediction(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(PresageError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != "1.0.0" {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_storage(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.storage.data_dir.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.data_dir",
                "Data directory path cannot be empty",
            ));
        }
    }

    fn validate_llm(config: &Config, errors: &mut Vec<ValidationError>) {
        // If the LLM is enabled, the API key environment variable must hold a key
        if config.llm.enabled {
            let env_var = &config.llm.api_key_env;
            match std::env::var(env_var) {
                Ok(key) if key.is_empty() => {
                    errors.push(ValidationError::new(
                        "llm.api_key_env",
                        format!("Environment variable {} is empty", env_var),
                    ));
                }
                Err(_) => {
                    errors.push(ValidationError::new(
                        "llm.api_key_env",
                        format!("Environment variable {} is not set", env_var),
                    ));
                }
                Ok(_) => {}
            }
        }

        if config.llm.base_url.is_empty() {
            errors.push(ValidationError::new(
                "llm.base_url",
                "Base URL cannot be empty",
            ));
        }

        if config.llm.model.is_empty() {
            errors.push(ValidationError::new("llm.model", "Model cannot be empty"));
        }

        let temp = config.llm.temperature;
        if !(0.0..=2.0).contains(&temp) {
            errors.push(ValidationError::new(
                "llm.temperature",
                format!("Temperature must be between 0.0 and 2.0, got {}", temp),
            ));
        }

        if config.llm.max_tokens == 0 {
            errors.push(ValidationError::new(
                "llm.max_tokens",
                "Max tokens must be greater than 0",
            ));
        }
    }

    fn validate_embedding(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.embedding.model.is_empty() {
            errors.push(ValidationError::new(
                "embedding.model",
                "Model name cannot be empty",
            ));
        }

        if config.embedding.batch_size == 0 {
            errors.push(ValidationError::new(
                "embedding.batch_size",
                "Batch size must be greater than 0",
            ));
        }
    }

    fn validate_index(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.index.vector_dim == 0 {
            errors.push(ValidationError::new(
                "index.vector_dim",
                "Vector dimension must be greater than 0",
            ));
        }

        if config.index.top_k == 0 {
            errors.push(ValidationError::new(
                "index.top_k",
                "top_k must be greater than 0",
            ));
        }

        let threshold = config.index.similarity_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            errors.push(ValidationError::new(
                "index.similarity_threshold",
                format!(
                    "Similarity threshold must be between 0.0 and 1.0, got {}",
                    threshold
                ),
            ));
        }
    }

    fn validate_cache(config: &Config, errors: &mut Vec<ValidationError>) {
        for (path, ttl) in [
            ("cache.prediction_ttl_secs", config.cache.prediction_ttl_secs),
            ("cache.answer_ttl_secs", config.cache.answer_ttl_secs),
            ("cache.retrieval_ttl_secs", config.cache.retrieval_ttl_secs),
        ] {
            if ttl <= 0 {
                errors.push(ValidationError::new(
                    path,
                    format!("TTL must be greater than 0, got {}", ttl),
                ));
            }
        }
    }

    fn validate_prediction(config: &Config, errors: &mut Vec<ValidationError>) {
        let confidence = config.prediction.confidence_threshold;
        if !(0.0..=1.0).contains(&confidence) {
            errors.push(ValidationError::new(
                "prediction.confidence_threshold",
                format!(
                    "Confidence threshold must be between 0.0 and 1.0, got {}",
                    confidence
                ),
            ));
        }

        if config.prediction.max_messages == 0 {
            errors.push(ValidationError::new(
                "prediction.max_messages",
                "max_messages must be greater than 0",
            ));
        }

        let overlap = config.prediction.match_overlap_threshold;
        if !(0.0..=1.0).contains(&overlap) {
            errors.push(ValidationError::new(
                "prediction.match_overlap_threshold",
                format!(
                    "Overlap threshold must be between 0.0 and 1.0, got {}",
                    overlap
                ),
            ));
        }
    }
}
