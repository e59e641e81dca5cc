//! Error types shared by stageload crates

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, StageloadError>;

/// Main error type for shared utilities
#[derive(Error, Debug)]
pub enum StageloadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Configuration error: {0}")]
    Config(String),
}
