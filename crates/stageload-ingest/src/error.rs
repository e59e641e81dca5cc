//! Error types for the incremental loader
//!
//! | Variant | Retryable | Raised by |
//! |---------|-----------|-----------|
//! | `SourceUnavailable` | yes | `extract` |
//! | `SchemaMismatch` | no, fix the data | `extract` |
//! | `DuplicateInBatch` | no, deduplicate first | `stage` under `DuplicatePolicy::Reject` |
//! | `MergeIncomplete` | yes, re-merge the same staging set | `merge` |

use stageload_common::StageloadError;
use thiserror::Error;

use crate::fingerprint::Fingerprint;
use crate::target::StoreError;

/// Result type alias for loader operations
pub type Result<T> = std::result::Result<T, LoadError>;

/// Why a merge stopped before reaching the end of its staging set
#[derive(Error, Debug)]
pub enum IncompleteCause {
    #[error("target store failed: {0}")]
    Store(#[from] StoreError),

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("merge cancelled")]
    Cancelled,
}

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Source unavailable: '{location}': {reason}")]
    SourceUnavailable { location: String, reason: String },

    #[error("Schema mismatch at line {line}, column '{column}': {reason}")]
    SchemaMismatch {
        line: u64,
        column: String,
        reason: String,
    },

    #[error("Duplicate fingerprint {fingerprint} in batch: line {first_line} repeated at line {duplicate_line}")]
    DuplicateInBatch {
        fingerprint: Fingerprint,
        first_line: u64,
        duplicate_line: u64,
    },

    /// `rows_merged` counts the staging-set prefix that is durably applied
    #[error("Merge incomplete after {rows_merged} rows ({rows_inserted} inserted): {cause}")]
    MergeIncomplete {
        rows_merged: usize,
        rows_inserted: usize,
        #[source]
        cause: IncompleteCause,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Common(#[from] StageloadError),
}

impl LoadError {
    pub fn source_unavailable(location: impl Into<String>, reason: impl ToString) -> Self {
        Self::SourceUnavailable {
            location: location.into(),
            reason: reason.to_string(),
        }
    }

    pub fn schema_mismatch(line: u64, column: impl Into<String>, reason: impl ToString) -> Self {
        Self::SchemaMismatch {
            line,
            column: column.into(),
            reason: reason.to_string(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether re-running the failed step without changing its input can succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LoadError::SourceUnavailable { .. } | LoadError::MergeIncomplete { .. }
        )
    }

    /// Length of the applied prefix when a merge stopped early
    pub fn rows_merged(&self) -> Option<usize> {
        match self {
            LoadError::MergeIncomplete { rows_merged, .. } => Some(*rows_merged),
            _ => None,
        }
    }
}
