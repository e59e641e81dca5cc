//! Stageload Ingest Library
//!
//! Idempotent incremental loading of flat files into a uniquely keyed table.
//!
//! # Pipeline
//!
//! - **extract**: read a CSV (optionally gzip) source and coerce it to a
//!   declared [`Schema`](stageload_common::types::Schema)
//! - **stage**: fingerprint each row and collapse intra-batch duplicates
//! - **merge**: insert only rows whose fingerprint the target lacks
//!
//! Re-running a load with the same input never adds rows; a superset input
//! adds only the new ones.
//!
//! # Example
//!
//! ```no_run
//! use stageload_common::types::Schema;
//! use stageload_ingest::{Loader, LoaderConfig, LocalSource, MemoryTarget};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let schema = Arc::new(Schema::from_file("schema.yaml")?);
//!     let loader = Loader::new(LoaderConfig::default().with_fingerprint_columns(["id", "ts"]))?;
//!     let target = MemoryTarget::new();
//!
//!     let result = loader
//!         .load(&LocalSource::new(), "./data/trips.csv.gz", schema, &target)
//!         .await?;
//!     println!("{} inserted, {} skipped", result.rows_inserted, result.rows_skipped);
//!     Ok(())
//! }
//! ```
//!
//! # Warehouse targets
//!
//! Some warehouses re-evaluate a `WITH` clause every time it is referenced.
//! A merge written as a CTE that is read twice (once to find new keys, once
//! to insert) can then see two different snapshots. Materialize the staging
//! rows into a table before merging.

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod error;
pub mod extract;
pub mod fingerprint;
pub mod loader;
pub mod merge;
pub mod retry;
pub mod source;
pub mod stage;
pub mod target;

pub use config::{LoaderConfig, TargetConfig};
pub use error::{IncompleteCause, LoadError, Result};
pub use extract::{extract, Batch, ExtractOptions};
pub use fingerprint::{Fingerprint, Fingerprinter};
pub use loader::{LoadReport, Loader};
pub use merge::{merge, merge_from, MergeOptions, MergeResult};
pub use retry::{merge_with_retry, RetryPolicy};
pub use source::{source_for, HttpSource, LocalSource, SourceStore};
pub use stage::{stage, DuplicatePolicy, StagedRow, StagingSet};
#[cfg(feature = "database")]
pub use target::PostgresTarget;
pub use target::{MemoryTarget, StoreError, TargetStore};
