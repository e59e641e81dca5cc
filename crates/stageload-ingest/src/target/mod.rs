//! Target store collaborators
//!
//! A target owns the durable fingerprint → row table. Uniqueness of the
//! fingerprint must be enforced by the store itself, so that independent
//! loader processes cannot both insert the same row. Each call to
//! [`TargetStore::insert_if_absent`] is atomic: either every row of the chunk
//! is applied (inserted or found present) or none is.

use async_trait::async_trait;
use std::collections::HashSet;
use thiserror::Error;
use uuid::Uuid;

use crate::fingerprint::Fingerprint;
use crate::stage::StagedRow;

mod memory;
#[cfg(feature = "database")]
mod postgres;

pub use memory::MemoryTarget;
#[cfg(feature = "database")]
pub use postgres::PostgresTarget;

/// Errors raised by a target store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("target unavailable: {0}")]
    Unavailable(String),

    #[error("stored row could not be decoded: {0}")]
    Corrupt(String),

    #[error("target backend error: {0}")]
    Backend(String),
}

#[cfg(feature = "database")]
impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StoreError::Unavailable(err.to_string())
            },
            other => StoreError::Backend(other.to_string()),
        }
    }
}

/// Durable, uniquely keyed row table
#[async_trait]
pub trait TargetStore: Send + Sync {
    /// Short name used in logs
    fn kind(&self) -> &'static str;

    /// Insert every row whose fingerprint is absent, atomically for the whole
    /// slice. Returns the number of rows actually inserted.
    async fn insert_if_absent(
        &self,
        rows: &[StagedRow],
        batch_id: Uuid,
    ) -> Result<usize, StoreError>;

    /// The subset of `fingerprints` already present
    async fn existing(&self, fingerprints: &[Fingerprint])
        -> Result<HashSet<Fingerprint>, StoreError>;

    async fn len(&self) -> Result<u64, StoreError>;

    async fn get(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<Option<stageload_common::types::Row>, StoreError>;

    async fn contains(&self, fingerprint: &Fingerprint) -> Result<bool, StoreError> {
        Ok(!self
            .existing(std::slice::from_ref(fingerprint))
            .await?
            .is_empty())
    }
}
