//! Merge: conditionally insert a staging set into a target
//!
//! Rows are applied in staging order, one chunk per store call. Because each
//! chunk is atomic, the rows applied when a merge stops early always form a
//! prefix of the staging set, and that prefix length is reported as
//! `rows_merged`. Re-merging the same staging set is always safe.
//!
//! Abort points (deadline, cancellation) are checked between chunks only.

use serde::{Deserialize, Serialize};
use std::ops::AddAssign;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::{IncompleteCause, LoadError, Result};
use crate::fingerprint::Fingerprint;
use crate::stage::{StagedRow, StagingSet};
use crate::target::TargetStore;

/// Default rows per atomic store call
pub const DEFAULT_MERGE_CHUNK_SIZE: usize = 500;

/// Counts produced by a merge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MergeResult {
    pub rows_inserted: usize,
    pub rows_skipped: usize,
}

impl MergeResult {
    pub fn rows_merged(&self) -> usize {
        self.rows_inserted + self.rows_skipped
    }
}

impl AddAssign for MergeResult {
    fn add_assign(&mut self, other: Self) {
        self.rows_inserted += other.rows_inserted;
        self.rows_skipped += other.rows_skipped;
    }
}

#[derive(Debug, Clone)]
pub struct MergeOptions {
    pub chunk_size: usize,
    /// Stop before starting a chunk once this instant has passed
    pub deadline: Option<Instant>,
    pub cancel: Option<CancellationToken>,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_MERGE_CHUNK_SIZE,
            deadline: None,
            cancel: None,
        }
    }
}

impl MergeOptions {
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    fn abort_cause(&self) -> Option<IncompleteCause> {
        if self.cancel.as_ref().is_some_and(|t| t.is_cancelled()) {
            return Some(IncompleteCause::Cancelled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Some(IncompleteCause::DeadlineExceeded);
        }
        None
    }
}

/// Merge a whole staging set into `target`
pub async fn merge(
    staging: &StagingSet,
    target: &dyn TargetStore,
    options: &MergeOptions,
) -> Result<MergeResult> {
    merge_from(staging, target, 0, options).await
}

/// Merge the staging set starting at row `start`.
///
/// The returned counts cover rows `start..` only; `rows_merged` in a
/// `MergeIncomplete` error is absolute (counted from row 0).
#[instrument(
    skip_all,
    fields(batch_id = %staging.batch_id(), target = target.kind(), start = start, staged = staging.len())
)]
pub async fn merge_from(
    staging: &StagingSet,
    target: &dyn TargetStore,
    start: usize,
    options: &MergeOptions,
) -> Result<MergeResult> {
    if options.chunk_size == 0 {
        return Err(LoadError::config("merge chunk size must be greater than 0"));
    }
    if start > staging.len() {
        return Err(LoadError::config(format!(
            "merge offset {} is past the end of a staging set of {} rows",
            start,
            staging.len()
        )));
    }

    let mut result = MergeResult::default();
    let mut rows_merged = start;

    for chunk in staging.rows()[start..].chunks(options.chunk_size) {
        if let Some(cause) = options.abort_cause() {
            warn!(rows_merged, %cause, "Merge stopped between chunks");
            return Err(incomplete(rows_merged, result, cause));
        }

        let applied = merge_chunk(chunk, target, staging.batch_id())
            .await
            .map_err(|cause| incomplete(rows_merged, result, cause))?;

        rows_merged += chunk.len();
        result += applied;
    }

    info!(
        rows_inserted = result.rows_inserted,
        rows_skipped = result.rows_skipped,
        "Merge complete"
    );
    Ok(result)
}

/// Skip rows the target already holds, then conditionally insert the rest.
///
/// The pre-check only saves writes; a row inserted by a concurrent merge
/// between the check and the insert is still refused by the store and
/// counted as skipped.
async fn merge_chunk(
    chunk: &[StagedRow],
    target: &dyn TargetStore,
    batch_id: uuid::Uuid,
) -> std::result::Result<MergeResult, IncompleteCause> {
    let fingerprints: Vec<Fingerprint> = chunk.iter().map(|s| s.fingerprint).collect();
    let present = target.existing(&fingerprints).await?;

    let candidates: Vec<StagedRow> = chunk
        .iter()
        .filter(|s| !present.contains(&s.fingerprint))
        .cloned()
        .collect();

    let inserted = if candidates.is_empty() {
        0
    } else {
        target.insert_if_absent(&candidates, batch_id).await?
    };

    debug!(
        chunk = chunk.len(),
        already_present = present.len(),
        inserted,
        "Merged chunk"
    );

    Ok(MergeResult {
        rows_inserted: inserted,
        rows_skipped: chunk.len() - inserted,
    })
}

fn incomplete(rows_merged: usize, result: MergeResult, cause: IncompleteCause) -> LoadError {
    LoadError::MergeIncomplete {
        rows_merged,
        rows_inserted: result.rows_inserted,
        cause,
    }
}
