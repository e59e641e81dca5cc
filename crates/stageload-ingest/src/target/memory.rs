//! In-process target table
//!
//! Uniqueness holds for every handle cloned from the same `MemoryTarget`.
//! It does not extend across processes; use a database target for that.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use stageload_common::types::Row;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{StoreError, TargetStore};
use crate::fingerprint::Fingerprint;
use crate::stage::StagedRow;

#[derive(Debug, Clone)]
struct StoredRow {
    row: Row,
    batch_id: Uuid,
    loaded_at: DateTime<Utc>,
}

/// Shared in-memory table keyed by fingerprint
#[derive(Debug, Clone, Default)]
pub struct MemoryTarget {
    rows: Arc<Mutex<HashMap<Fingerprint, StoredRow>>>,
}

impl MemoryTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Batch that first inserted `fingerprint`
    pub async fn inserted_by(&self, fingerprint: &Fingerprint) -> Option<(Uuid, DateTime<Utc>)> {
        self.rows
            .lock()
            .await
            .get(fingerprint)
            .map(|stored| (stored.batch_id, stored.loaded_at))
    }
}

#[async_trait]
impl TargetStore for MemoryTarget {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn insert_if_absent(
        &self,
        rows: &[StagedRow],
        batch_id: Uuid,
    ) -> Result<usize, StoreError> {
        let loaded_at = Utc::now();
        let mut table = self.rows.lock().await;
        let mut inserted = 0;

        for staged in rows {
            if let std::collections::hash_map::Entry::Vacant(slot) =
                table.entry(staged.fingerprint)
            {
                slot.insert(StoredRow {
                    row: staged.row.clone(),
                    batch_id,
                    loaded_at,
                });
                inserted += 1;
            }
        }

        Ok(inserted)
    }

    async fn existing(
        &self,
        fingerprints: &[Fingerprint],
    ) -> Result<HashSet<Fingerprint>, StoreError> {
        let table = self.rows.lock().await;
        Ok(fingerprints
            .iter()
            .filter(|fp| table.contains_key(*fp))
            .copied()
            .collect())
    }

    async fn len(&self) -> Result<u64, StoreError> {
        Ok(self.rows.lock().await.len() as u64)
    }

    async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<Row>, StoreError> {
        Ok(self
            .rows
            .lock()
            .await
            .get(fingerprint)
            .map(|stored| stored.row.clone()))
    }
}
