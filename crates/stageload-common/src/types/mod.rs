//! Common types used across stageload

use serde::{Deserialize, Serialize};

mod schema;
mod value;

pub use schema::{ColumnSpec, ColumnType, Row, Schema};
pub use value::{parse_timestamp, CoerceError, Value};

/// Checksum algorithm type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    #[default]
    Sha256,
    Sha512,
}

impl std::fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChecksumAlgorithm::Sha256 => write!(f, "sha256"),
            ChecksumAlgorithm::Sha512 => write!(f, "sha512"),
        }
    }
}

impl std::str::FromStr for ChecksumAlgorithm {
    type Err = crate::StageloadError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sha256" | "sha-256" => Ok(ChecksumAlgorithm::Sha256),
            "sha512" | "sha-512" => Ok(ChecksumAlgorithm::Sha512),
            other => Err(crate::StageloadError::Config(format!(
                "unknown checksum algorithm: {}",
                other
            ))),
        }
    }
}
