//! Caller-side retry for interrupted merges
//!
//! The core never retries on its own. A caller that wants resilience re-merges
//! the same staging set from the `rows_merged` offset of each
//! `MergeIncomplete`, which is safe because merging is idempotent.

use std::time::Duration;
use tracing::{info, warn};

use crate::error::{IncompleteCause, LoadError, Result};
use crate::merge::{merge_from, MergeOptions, MergeResult};
use crate::stage::StagingSet;
use crate::target::TargetStore;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// Delay before the first retry; doubled for each later attempt
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: Duration) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    fn delay(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(1u32 << attempt.min(16))
    }
}

/// Merge `staging`, resuming after store failures up to `policy.max_retries`
/// times.
///
/// Deadline and cancellation aborts are returned immediately. The returned
/// counts cover the whole staging set across all attempts.
pub async fn merge_with_retry(
    staging: &StagingSet,
    target: &dyn TargetStore,
    options: &MergeOptions,
    policy: &RetryPolicy,
) -> Result<MergeResult> {
    let mut start = 0;
    let mut inserted_before = 0;
    let mut attempt = 0;

    loop {
        match merge_from(staging, target, start, options).await {
            Ok(tail) => {
                let rows_inserted = inserted_before + tail.rows_inserted;
                if attempt > 0 {
                    info!(attempts = attempt + 1, rows_inserted, "Merge completed after retry");
                }
                return Ok(MergeResult {
                    rows_inserted,
                    rows_skipped: staging.len() - rows_inserted,
                });
            },
            Err(LoadError::MergeIncomplete {
                rows_merged,
                rows_inserted,
                cause: cause @ IncompleteCause::Store(_),
            }) if attempt < policy.max_retries => {
                let delay = policy.delay(attempt);
                warn!(
                    attempt = attempt + 1,
                    max_retries = policy.max_retries,
                    rows_merged,
                    delay_ms = delay.as_millis() as u64,
                    error = %cause,
                    "Merge interrupted, resuming"
                );
                inserted_before += rows_inserted;
                start = rows_merged;
                attempt += 1;
                tokio::time::sleep(delay).await;
            },
            Err(LoadError::MergeIncomplete {
                rows_merged,
                rows_inserted,
                cause,
            }) => {
                return Err(LoadError::MergeIncomplete {
                    rows_merged,
                    rows_inserted: inserted_before + rows_inserted,
                    cause,
                });
            },
            Err(other) => return Err(other),
        }
    }
}
