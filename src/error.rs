use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the Presage application
#[derive(Error, Debug)]
pub enum PresageError {
    /// Configuration loading and parsing errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// One or more configuration values failed validation
    #[error("Configuration validation failed: {errors:?}")]
    ConfigValidation { errors: Vec<ValidationError> },

    /// The configuration file does not exist
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// A single configuration value is out of range or unparsable
    #[error("Invalid configuration value at {path}: {message}")]
    InvalidConfigValue { path: String, message: String },

    /// Chat session not found
    #[error("Session not found: {id}")]
    SessionNotFound { id: String },

    /// Precomputed answer not found in the cache or prediction store
    #[error("Precomputed answer not found: {id}")]
    AnswerNotFound { id: String },

    /// Prediction requested for an empty conversation
    #[error("Message history is empty, nothing to predict from")]
    EmptyHistory,

    /// Embedding generation errors
    #[error("Embedding error: {0}")]
    Embedding(#[from] crate::embedding::EmbeddingError),

    /// Vector index errors
    #[error("Index error: {0}")]
    Index(#[from] crate::index::IndexError),

    /// Document ingestion errors
    #[error("Ingestion error: {0}")]
    Ingest(String),

    /// IO failures, tagged with what was being touched
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// Configuration TOML could not be parsed
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration could not be rendered as TOML
    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    /// JSON encode/decode failures, tagged with what was being handled
    #[error("JSON error: {context}: {source}")]
    Json {
        source: serde_json::Error,
        context: String,
    },

    /// SQLite session store errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Daemon lifecycle errors
    #[error("Daemon error: {0}")]
    Daemon(String),

    /// No live daemon behind the PID file
    #[error("Daemon is not running")]
    DaemonNotRunning,

    /// Anything else, carried transparently
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// One failed configuration check, pointing at the offending key
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Dotted path of the key that failed
    pub path: String,
    /// What was wrong with it
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type for Presage operations
pub type Result<T> = std::result::Result<T, PresageError>;
