//! Stage: fingerprint a batch into a transient staging set

use serde::{Deserialize, Serialize};
use stageload_common::types::Row;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::error::{LoadError, Result};
use crate::extract::Batch;
use crate::fingerprint::{Fingerprint, Fingerprinter};

/// How `stage` treats rows in one batch that share a fingerprint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum DuplicatePolicy {
    /// The later row replaces the earlier one, keeping its position
    #[default]
    LastWriteWins,
    /// Fail with `LoadError::DuplicateInBatch`
    Reject,
}

impl std::str::FromStr for DuplicatePolicy {
    type Err = LoadError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "last-write-wins" | "last_write_wins" | "lww" => Ok(DuplicatePolicy::LastWriteWins),
            "reject" | "error" => Ok(DuplicatePolicy::Reject),
            other => Err(LoadError::config(format!("unknown duplicate policy: {}", other))),
        }
    }
}

impl std::fmt::Display for DuplicatePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DuplicatePolicy::LastWriteWins => write!(f, "last-write-wins"),
            DuplicatePolicy::Reject => write!(f, "reject"),
        }
    }
}

/// One staged row and its identity
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StagedRow {
    pub fingerprint: Fingerprint,
    pub row: Row,
}

/// Fingerprint → row for a single batch, ordered by first occurrence.
///
/// The order defines which rows form the "prefix" reported by an incomplete
/// merge.
#[derive(Debug, Clone)]
pub struct StagingSet {
    batch_id: Uuid,
    rows: Vec<StagedRow>,
    duplicates_collapsed: usize,
}

impl StagingSet {
    pub fn batch_id(&self) -> Uuid {
        self.batch_id
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows dropped because a later row in the batch had the same fingerprint
    pub fn duplicates_collapsed(&self) -> usize {
        self.duplicates_collapsed
    }

    pub fn rows(&self) -> &[StagedRow] {
        &self.rows
    }

    pub fn get(&self, fingerprint: &Fingerprint) -> Option<&Row> {
        self.rows
            .iter()
            .find(|staged| &staged.fingerprint == fingerprint)
            .map(|staged| &staged.row)
    }

    pub fn fingerprints(&self) -> impl Iterator<Item = &Fingerprint> {
        self.rows.iter().map(|staged| &staged.fingerprint)
    }
}

/// Fingerprint every row of `batch` and collapse intra-batch duplicates
#[instrument(skip_all, fields(batch_id = %batch.id(), rows = batch.len()))]
pub fn stage(
    batch: &Batch,
    fingerprint_columns: &[String],
    policy: DuplicatePolicy,
) -> Result<StagingSet> {
    let fingerprinter = Fingerprinter::new(batch.schema(), fingerprint_columns)?;

    let mut rows: Vec<StagedRow> = Vec::with_capacity(batch.len());
    let mut positions: HashMap<Fingerprint, usize> = HashMap::with_capacity(batch.len());
    let mut duplicates_collapsed = 0;

    for (index, row) in batch.rows().iter().enumerate() {
        let fingerprint = fingerprinter.fingerprint(row);

        match positions.entry(fingerprint) {
            Entry::Vacant(slot) => {
                slot.insert(rows.len());
                rows.push(StagedRow {
                    fingerprint,
                    row: row.clone(),
                });
            },
            Entry::Occupied(slot) => match policy {
                DuplicatePolicy::LastWriteWins => {
                    rows[*slot.get()].row = row.clone();
                    duplicates_collapsed += 1;
                },
                DuplicatePolicy::Reject => {
                    let first_index = first_index_of(batch, &fingerprinter, &fingerprint, index);
                    return Err(LoadError::DuplicateInBatch {
                        fingerprint,
                        first_line: first_index.and_then(|i| batch.line_of(i)).unwrap_or(0),
                        duplicate_line: batch.line_of(index).unwrap_or(0),
                    });
                },
            },
        }
    }

    debug!(
        staged = rows.len(),
        duplicates_collapsed,
        columns = ?fingerprinter.columns(),
        "Staged batch"
    );

    Ok(StagingSet {
        batch_id: batch.id(),
        rows,
        duplicates_collapsed,
    })
}

fn first_index_of(
    batch: &Batch,
    fingerprinter: &Fingerprinter,
    fingerprint: &Fingerprint,
    before: usize,
) -> Option<usize> {
    batch.rows()[..before]
        .iter()
        .position(|row| &fingerprinter.fingerprint(row) == fingerprint)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::extract::parse_batch;
    use stageload_common::types::{ColumnSpec, ColumnType, Schema, Value};
    use std::sync::Arc;

    const TRIPS: &str = "id,ts,amt\n\
        1,2019-01-01T00:00:00,10.0\n\
        1,2019-01-01T00:00:00,10.0\n\
        2,2019-01-01T00:05:00,5.0\n";

    fn batch(csv: &str) -> Batch {
        let schema = Schema::new(vec![
            ColumnSpec::new("id", ColumnType::Integer),
            ColumnSpec::new("ts", ColumnType::Timestamp),
            ColumnSpec::new("amt", ColumnType::Float),
        ])
        .unwrap();
        parse_batch(csv.as_bytes(), "trips.csv", Arc::new(schema), &Default::default()).unwrap()
    }

    fn id_ts() -> Vec<String> {
        vec!["id".to_string(), "ts".to_string()]
    }

    #[test]
    fn test_last_write_wins_collapses_duplicates() {
        let staging = stage(&batch(TRIPS), &id_ts(), DuplicatePolicy::LastWriteWins).unwrap();
        assert_eq!(staging.len(), 2);
        assert_eq!(staging.duplicates_collapsed(), 1);
    }

    #[test]
    fn test_last_write_wins_keeps_later_value_at_first_position() {
        let csv = "id,ts,amt\n1,2019-01-01,1.0\n2,2019-01-01,2.0\n1,2019-01-01,3.0\n";
        let staging = stage(&batch(csv), &id_ts(), DuplicatePolicy::LastWriteWins).unwrap();

        let first = &staging.rows()[0].row;
        assert_eq!(first.get("id"), Some(&Value::Integer(1)));
        assert_eq!(first.get("amt"), Some(&Value::Float(3.0)));
        assert_eq!(staging.get(&staging.rows()[0].fingerprint), Some(first));
    }

    #[test]
    fn test_reject_policy_reports_lines() {
        let err = stage(&batch(TRIPS), &id_ts(), DuplicatePolicy::Reject).unwrap_err();
        match err {
            LoadError::DuplicateInBatch {
                first_line,
                duplicate_line,
                ..
            } => {
                assert_eq!(first_line, 2);
                assert_eq!(duplicate_line, 3);
            },
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_stage_is_deterministic_across_batches() {
        let a = stage(&batch(TRIPS), &id_ts(), DuplicatePolicy::LastWriteWins).unwrap();
        let b = stage(&batch(TRIPS), &id_ts(), DuplicatePolicy::LastWriteWins).unwrap();
        assert_ne!(a.batch_id(), b.batch_id());
        assert!(a.fingerprints().eq(b.fingerprints()));
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!(
            "last-write-wins".parse::<DuplicatePolicy>().unwrap(),
            DuplicatePolicy::LastWriteWins
        );
        assert_eq!("Reject".parse::<DuplicatePolicy>().unwrap(), DuplicatePolicy::Reject);
        assert!("first-wins".parse::<DuplicatePolicy>().is_err());
    }
}
