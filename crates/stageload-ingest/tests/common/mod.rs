//! Shared helpers for loader integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use stageload_common::types::{ColumnSpec, ColumnType, Row, Schema};
use stageload_ingest::{Fingerprint, MemoryTarget, StagedRow, StoreError, TargetStore};
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

pub const TRIPS_HEADER: &str = "id,ts,amt\n";

/// `id, ts, amt` with `id` and `ts` required
pub fn trips_schema() -> Arc<Schema> {
    Arc::new(
        Schema::new(vec![
            ColumnSpec::new("id", ColumnType::Integer).required(),
            ColumnSpec::new("ts", ColumnType::Timestamp).required(),
            ColumnSpec::new("amt", ColumnType::Float),
        ])
        .expect("valid schema"),
    )
}

pub fn fingerprint_on_id_ts() -> Vec<String> {
    vec!["id".to_string(), "ts".to_string()]
}

/// Write a trips CSV with one row per `(id, minute, amt)`
pub fn write_trips(dir: &Path, name: &str, rows: &[(i64, u32, f64)]) {
    let mut csv = String::from(TRIPS_HEADER);
    for (id, minute, amt) in rows {
        csv.push_str(&format!("{},2019-01-01T00:{:02}:00,{}\n", id, minute, amt));
    }
    std::fs::write(dir.join(name), csv).expect("write csv");
}

/// Target that accepts `allowed_calls` insert calls, then fails every call
#[derive(Clone)]
pub struct FailingTarget {
    inner: MemoryTarget,
    allowed_calls: Arc<AtomicUsize>,
}

impl FailingTarget {
    pub fn new(inner: MemoryTarget, allowed_calls: usize) -> Self {
        Self {
            inner,
            allowed_calls: Arc::new(AtomicUsize::new(allowed_calls)),
        }
    }

    /// Allow `calls` more insert calls
    pub fn heal(&self, calls: usize) {
        self.allowed_calls.store(calls, Ordering::SeqCst);
    }
}

#[async_trait]
impl TargetStore for FailingTarget {
    fn kind(&self) -> &'static str {
        "failing"
    }

    async fn insert_if_absent(
        &self,
        rows: &[StagedRow],
        batch_id: Uuid,
    ) -> Result<usize, StoreError> {
        let remaining = self.allowed_calls.load(Ordering::SeqCst);
        if remaining == 0 {
            return Err(StoreError::Unavailable("connection reset".to_string()));
        }
        self.allowed_calls.store(remaining - 1, Ordering::SeqCst);
        self.inner.insert_if_absent(rows, batch_id).await
    }

    async fn existing(&self, fingerprints: &[Fingerprint]) -> Result<HashSet<Fingerprint>, StoreError> {
        self.inner.existing(fingerprints).await
    }

    async fn len(&self) -> Result<u64, StoreError> {
        self.inner.len().await
    }

    async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<Row>, StoreError> {
        self.inner.get(fingerprint).await
    }
}
