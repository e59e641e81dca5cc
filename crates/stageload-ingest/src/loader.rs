//! Extract → stage → merge, composed
//!
//! [`Loader`] holds a validated [`LoaderConfig`] and runs the three steps
//! against caller-supplied collaborators. It keeps no state between calls.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stageload_common::types::Schema;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::config::LoaderConfig;
use crate::error::Result;
use crate::extract::{self, Batch};
use crate::merge::{self, MergeOptions, MergeResult};
use crate::source::SourceStore;
use crate::stage::{self, StagingSet};
use crate::target::TargetStore;

/// Summary of one `load` run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadReport {
    pub batch_id: Uuid,
    pub source: String,
    pub source_checksum: String,
    pub extracted_at: DateTime<Utc>,
    pub rows_extracted: usize,
    pub rows_staged: usize,
    pub duplicates_collapsed: usize,
    pub rows_inserted: usize,
    pub rows_skipped: usize,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
}

impl LoadReport {
    pub fn merge_result(&self) -> MergeResult {
        MergeResult {
            rows_inserted: self.rows_inserted,
            rows_skipped: self.rows_skipped,
        }
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis().min(u128::from(u64::MAX)) as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[derive(Debug, Clone)]
pub struct Loader {
    config: LoaderConfig,
}

impl Loader {
    pub fn new(config: LoaderConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub async fn extract(
        &self,
        source: &dyn SourceStore,
        location: &str,
        schema: Arc<Schema>,
    ) -> Result<Batch> {
        extract::extract(source, location, schema, &self.config.extract_options()).await
    }

    pub fn stage(&self, batch: &Batch) -> Result<StagingSet> {
        stage::stage(
            batch,
            &self.config.fingerprint_columns,
            self.config.duplicate_policy,
        )
    }

    pub async fn merge(
        &self,
        staging: &StagingSet,
        target: &dyn TargetStore,
    ) -> Result<MergeResult> {
        merge::merge(staging, target, &self.config.merge_options()).await
    }

    /// Resume a merge at `start`, usually the `rows_merged` of a previous
    /// `MergeIncomplete`
    pub async fn merge_from(
        &self,
        staging: &StagingSet,
        target: &dyn TargetStore,
        start: usize,
        options: Option<&MergeOptions>,
    ) -> Result<MergeResult> {
        let defaults = self.config.merge_options();
        merge::merge_from(staging, target, start, options.unwrap_or(&defaults)).await
    }

    /// Extract, stage and merge one source location
    pub async fn load(
        &self,
        source: &dyn SourceStore,
        location: &str,
        schema: Arc<Schema>,
        target: &dyn TargetStore,
    ) -> Result<MergeResult> {
        Ok(self
            .load_report(source, location, schema, target)
            .await?
            .merge_result())
    }

    #[instrument(skip(self, source, schema, target), fields(target = target.kind()))]
    pub async fn load_report(
        &self,
        source: &dyn SourceStore,
        location: &str,
        schema: Arc<Schema>,
        target: &dyn TargetStore,
    ) -> Result<LoadReport> {
        let started = Instant::now();

        let batch = self.extract(source, location, schema).await?;
        let staging = self.stage(&batch)?;
        let merged = self.merge(&staging, target).await?;

        let report = LoadReport {
            batch_id: batch.id(),
            source: batch.source().to_string(),
            source_checksum: batch.source_checksum().to_string(),
            extracted_at: batch.extracted_at(),
            rows_extracted: batch.len(),
            rows_staged: staging.len(),
            duplicates_collapsed: staging.duplicates_collapsed(),
            rows_inserted: merged.rows_inserted,
            rows_skipped: merged.rows_skipped,
            duration: started.elapsed(),
        };

        info!(
            batch_id = %report.batch_id,
            extracted = report.rows_extracted,
            staged = report.rows_staged,
            inserted = report.rows_inserted,
            skipped = report.rows_skipped,
            duration_ms = report.duration.as_millis() as u64,
            "Load complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::source::LocalSource;
    use crate::target::MemoryTarget;
    use stageload_common::types::{ColumnSpec, ColumnType};

    fn schema() -> Arc<Schema> {
        Arc::new(
            Schema::new(vec![
                ColumnSpec::new("id", ColumnType::Integer),
                ColumnSpec::new("name", ColumnType::String),
            ])
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_load_report_counts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.csv"), "id,name\n1,x\n1,y\n2,z\n").unwrap();

        let loader =
            Loader::new(LoaderConfig::default().with_fingerprint_columns(["id"])).unwrap();
        let source = LocalSource::with_root(dir.path());
        let target = MemoryTarget::new();

        let report = loader.load_report(&source, "a.csv", schema(), &target).await.unwrap();
        assert_eq!(report.rows_extracted, 3);
        assert_eq!(report.rows_staged, 2);
        assert_eq!(report.duplicates_collapsed, 1);
        assert_eq!(report.rows_inserted, 2);
        assert_eq!(report.source, "a.csv");
        assert_eq!(report.source_checksum.len(), 64);

        let again = loader.load(&source, "a.csv", schema(), &target).await.unwrap();
        assert_eq!(again, MergeResult { rows_inserted: 0, rows_skipped: 2 });
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        assert!(Loader::new(LoaderConfig::default().with_merge_chunk_size(0)).is_err());
    }

    #[test]
    fn test_report_serializes_duration_as_millis() {
        let report = LoadReport {
            batch_id: Uuid::nil(),
            source: "s".into(),
            source_checksum: "c".into(),
            extracted_at: Utc::now(),
            rows_extracted: 0,
            rows_staged: 0,
            duplicates_collapsed: 0,
            rows_inserted: 0,
            rows_skipped: 0,
            duration: Duration::from_millis(1500),
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["duration"], 1500);
    }
}
