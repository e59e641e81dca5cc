//! Loader configuration
//!
//! Values come from defaults, then environment variables (a `.env` file is
//! honoured), then CLI flags.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{LoadError, Result};
use crate::extract::ExtractOptions;
use crate::merge::{MergeOptions, DEFAULT_MERGE_CHUNK_SIZE};
use crate::stage::DuplicatePolicy;

// ============================================================================
// Loader Configuration Constants
// ============================================================================

/// Upper bound on rows per merge chunk (keeps a chunk within one statement)
pub const MAX_MERGE_CHUNK_SIZE: usize = 10_000;

/// Default number of merge retries after `MergeIncomplete`
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default delay before the first retry; doubles on each attempt
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 500;

/// Default target table for the database store
pub const DEFAULT_TARGET_TABLE: &str = "stageload_rows";

/// Default maximum database connections in the pool
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 5;

/// Default CSV field delimiter
pub const DEFAULT_DELIMITER: u8 = b',';

/// Loader configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Columns that identify a row; empty means every schema column
    pub fingerprint_columns: Vec<String>,
    pub duplicate_policy: DuplicatePolicy,
    pub merge_chunk_size: usize,
    /// Cap on extracted rows for quick runs; `None` reads everything
    pub max_rows: Option<usize>,
    /// CSV field delimiter byte
    pub delimiter: u8,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            fingerprint_columns: Vec::new(),
            duplicate_policy: DuplicatePolicy::LastWriteWins,
            merge_chunk_size: DEFAULT_MERGE_CHUNK_SIZE,
            max_rows: None,
            delimiter: DEFAULT_DELIMITER,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
        }
    }
}

impl LoaderConfig {
    /// Load configuration from environment and defaults
    ///
    /// - `STAGELOAD_FINGERPRINT_COLUMNS`: comma-separated column list
    /// - `STAGELOAD_DUPLICATE_POLICY`: `last-write-wins` or `reject`
    /// - `STAGELOAD_MERGE_CHUNK_SIZE`
    /// - `STAGELOAD_MAX_ROWS`: 0 or unset for no cap
    /// - `STAGELOAD_DELIMITER`: one ASCII character, or `tab`
    /// - `STAGELOAD_MAX_RETRIES`
    /// - `STAGELOAD_RETRY_BACKOFF_MS`
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = Self::default();

        if let Ok(columns) = std::env::var("STAGELOAD_FINGERPRINT_COLUMNS") {
            config.fingerprint_columns = split_columns(&columns);
        }

        if let Ok(policy) = std::env::var("STAGELOAD_DUPLICATE_POLICY") {
            config.duplicate_policy = policy.parse()?;
        }

        if let Some(size) = env_number("STAGELOAD_MERGE_CHUNK_SIZE")? {
            config.merge_chunk_size = size;
        }

        if let Some(max) = env_number::<usize>("STAGELOAD_MAX_ROWS")? {
            config.max_rows = (max > 0).then_some(max);
        }

        if let Ok(delimiter) = std::env::var("STAGELOAD_DELIMITER") {
            config.delimiter = parse_delimiter(&delimiter)?;
        }

        if let Some(retries) = env_number("STAGELOAD_MAX_RETRIES")? {
            config.max_retries = retries;
        }

        if let Some(backoff) = env_number("STAGELOAD_RETRY_BACKOFF_MS")? {
            config.retry_backoff_ms = backoff;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_fingerprint_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fingerprint_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicate_policy = policy;
        self
    }

    pub fn with_merge_chunk_size(mut self, size: usize) -> Self {
        self.merge_chunk_size = size;
        self
    }

    pub fn with_max_rows(mut self, max_rows: Option<usize>) -> Self {
        self.max_rows = max_rows;
        self
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.merge_chunk_size == 0 {
            return Err(LoadError::config("merge chunk size must be greater than 0"));
        }

        if self.merge_chunk_size > MAX_MERGE_CHUNK_SIZE {
            return Err(LoadError::config(format!(
                "merge chunk size ({}) cannot exceed {}",
                self.merge_chunk_size, MAX_MERGE_CHUNK_SIZE
            )));
        }

        if !self.delimiter.is_ascii() || matches!(self.delimiter, b'"' | b'\n' | b'\r') {
            return Err(LoadError::config(format!(
                "invalid CSV delimiter {:?}",
                char::from(self.delimiter)
            )));
        }

        if self.fingerprint_columns.iter().any(|c| c.trim().is_empty()) {
            return Err(LoadError::config("fingerprint column names cannot be empty"));
        }

        if self.fingerprint_columns.is_empty() {
            tracing::debug!("No fingerprint columns configured - every column identifies a row");
        }

        Ok(())
    }

    pub fn extract_options(&self) -> ExtractOptions {
        ExtractOptions {
            max_rows: self.max_rows,
            delimiter: self.delimiter,
            ..Default::default()
        }
    }

    pub fn merge_options(&self) -> MergeOptions {
        MergeOptions::default().with_chunk_size(self.merge_chunk_size)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Target store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Postgres URL; when absent the loader uses an in-memory table
    pub database_url: Option<String>,
    pub table: String,
    pub max_connections: u32,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            table: DEFAULT_TARGET_TABLE.to_string(),
            max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
        }
    }
}

impl TargetConfig {
    /// `DATABASE_URL`, `STAGELOAD_TARGET_TABLE`, `DATABASE_MAX_CONNECTIONS`
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = Self::default();
        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database_url = Some(url).filter(|u| !u.trim().is_empty());
        }
        if let Ok(table) = std::env::var("STAGELOAD_TARGET_TABLE") {
            config.table = table;
        }
        if let Some(max) = env_number("DATABASE_MAX_CONNECTIONS")? {
            config.max_connections = max;
        }

        if config.max_connections == 0 {
            return Err(LoadError::config("database max_connections must be greater than 0"));
        }
        Ok(config)
    }
}

/// Split a comma-separated column list, dropping blanks
pub fn split_columns(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parse a delimiter given as a single ASCII character, or `tab` / `\t`
pub fn parse_delimiter(raw: &str) -> Result<u8> {
    match (raw, raw.as_bytes()) {
        ("tab" | "\\t", _) => Ok(b'\t'),
        (_, [byte]) if byte.is_ascii() => Ok(*byte),
        _ => Err(LoadError::config(format!(
            "delimiter must be a single ASCII character, got '{}'",
            raw
        ))),
    }
}

fn env_number<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| LoadError::config(format!("{} must be a number, got '{}'", name, raw))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = LoaderConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.merge_chunk_size, DEFAULT_MERGE_CHUNK_SIZE);
        assert_eq!(config.duplicate_policy, DuplicatePolicy::LastWriteWins);
        assert!(config.fingerprint_columns.is_empty());
    }

    #[test]
    fn test_validation_bounds() {
        assert!(LoaderConfig::default().with_merge_chunk_size(0).validate().is_err());
        assert!(LoaderConfig::default()
            .with_merge_chunk_size(MAX_MERGE_CHUNK_SIZE + 1)
            .validate()
            .is_err());
        assert!(LoaderConfig::default()
            .with_fingerprint_columns(["id", " "])
            .validate()
            .is_err());
    }

    #[test]
    fn test_split_columns() {
        assert_eq!(split_columns(" id, ts ,,"), vec!["id".to_string(), "ts".to_string()]);
        assert!(split_columns("").is_empty());
    }

    #[test]
    fn test_options_follow_config() {
        let config = LoaderConfig::default()
            .with_max_rows(Some(5000))
            .with_merge_chunk_size(50);
        assert_eq!(config.extract_options().max_rows, Some(5000));
        assert_eq!(config.extract_options().delimiter, b',');
        assert_eq!(config.clone().with_delimiter(b'|').extract_options().delimiter, b'|');
        assert_eq!(config.merge_options().chunk_size, 50);
    }

    #[test]
    fn test_delimiter_parsing_and_validation() {
        assert_eq!(parse_delimiter(";").unwrap(), b';');
        assert_eq!(parse_delimiter("tab").unwrap(), b'\t');
        assert_eq!(parse_delimiter("\\t").unwrap(), b'\t');
        assert!(parse_delimiter("").is_err());
        assert!(parse_delimiter(";;").is_err());
        assert!(parse_delimiter("§").is_err());

        assert!(LoaderConfig::default().with_delimiter(b'\t').validate().is_ok());
        assert!(LoaderConfig::default().with_delimiter(b'"').validate().is_err());
        assert!(LoaderConfig::default().with_delimiter(b'\n').validate().is_err());
        assert!(LoaderConfig::default().with_delimiter(0xA7).validate().is_err());
    }
}
