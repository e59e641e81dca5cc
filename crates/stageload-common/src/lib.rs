//! Stageload Common Library
//!
//! Shared types, utilities, and error handling for the stageload workspace.
//!
//! # Overview
//!
//! - **Types**: typed scalar [`Value`](types::Value)s, column
//!   [`Schema`](types::Schema)s and [`Row`](types::Row)s
//! - **Checksums**: digests of raw source bytes for batch provenance
//! - **Logging**: `tracing` subscriber setup shared by binaries and tests
//! - **Error Handling**: [`StageloadError`] and the [`Result`] alias
//!
//! # Example
//!
//! ```no_run
//! use stageload_common::checksum::compute_bytes_checksum;
//! use stageload_common::types::{ChecksumAlgorithm, Schema};
//!
//! fn describe(schema_path: &str, data_path: &str) -> stageload_common::Result<()> {
//!     let schema = Schema::from_file(schema_path)?;
//!     let checksum = compute_bytes_checksum(&std::fs::read(data_path)?, ChecksumAlgorithm::Sha256);
//!     tracing::info!(columns = schema.len(), %checksum, "Source described");
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod checksum;
pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{Result, StageloadError};
