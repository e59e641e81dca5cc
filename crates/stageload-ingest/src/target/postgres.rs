//! PostgreSQL target table
//!
//! Layout:
//!
//! ```sql
//! CREATE TABLE <table> (
//!     fingerprint TEXT PRIMARY KEY,
//!     row_data    JSONB NOT NULL,
//!     batch_id    UUID NOT NULL,
//!     loaded_at   TIMESTAMPTZ NOT NULL DEFAULT now()
//! );
//! ```
//!
//! The primary key is what makes concurrent loaders safe: each chunk is one
//! `INSERT … ON CONFLICT (fingerprint) DO NOTHING` inside a transaction.

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};
use stageload_common::types::{Row, Schema};
use std::collections::HashSet;
use tracing::{debug, info};
use uuid::Uuid;

use super::{StoreError, TargetStore};
use crate::error::{LoadError, Result};
use crate::fingerprint::Fingerprint;
use crate::stage::StagedRow;

/// Bind parameters per inserted row
const BINDS_PER_ROW: usize = 3;

/// Postgres limits a statement to 65535 bind parameters
pub const MAX_ROWS_PER_STATEMENT: usize = u16::MAX as usize / BINDS_PER_ROW;

pub struct PostgresTarget {
    pool: PgPool,
    table: String,
    schema: Schema,
}

impl PostgresTarget {
    /// `table` may be schema-qualified (`ingestion.trips`)
    pub fn new(pool: PgPool, table: impl Into<String>, schema: Schema) -> Result<Self> {
        let table = table.into();
        validate_table_name(&table)?;
        Ok(Self {
            pool,
            table,
            schema,
        })
    }

    /// Create the target table if it does not exist
    pub async fn ensure_table(&self) -> std::result::Result<(), StoreError> {
        let ddl = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                fingerprint TEXT PRIMARY KEY,
                row_data JSONB NOT NULL,
                batch_id UUID NOT NULL,
                loaded_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
            self.table
        );
        sqlx::query(&ddl).execute(&self.pool).await?;
        info!(table = %self.table, "Target table ready");
        Ok(())
    }
}

fn validate_table_name(table: &str) -> Result<()> {
    let valid_part = |part: &str| {
        let mut chars = part.chars();
        matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    };

    let parts: Vec<&str> = table.split('.').collect();
    if parts.is_empty() || parts.len() > 2 || !parts.iter().all(|p| valid_part(p)) {
        return Err(LoadError::config(format!("invalid target table name: {}", table)));
    }
    Ok(())
}

#[async_trait]
impl TargetStore for PostgresTarget {
    fn kind(&self) -> &'static str {
        "postgres"
    }

    async fn insert_if_absent(
        &self,
        rows: &[StagedRow],
        batch_id: Uuid,
    ) -> std::result::Result<usize, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }
        if rows.len() > MAX_ROWS_PER_STATEMENT {
            return Err(StoreError::Backend(format!(
                "chunk of {} rows exceeds {} rows per statement",
                rows.len(),
                MAX_ROWS_PER_STATEMENT
            )));
        }

        let mut tx = self.pool.begin().await?;

        let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "INSERT INTO {} (fingerprint, row_data, batch_id) ",
            self.table
        ));
        query_builder.push_values(rows.iter(), |mut b, staged| {
            b.push_bind(staged.fingerprint.to_hex())
                .push_bind(staged.row.to_json())
                .push_bind(batch_id);
        });
        query_builder.push(" ON CONFLICT (fingerprint) DO NOTHING RETURNING fingerprint");

        let inserted: Vec<(String,)> = query_builder
            .build_query_as()
            .fetch_all(&mut *tx)
            .await?;

        tx.commit().await?;

        debug!(
            table = %self.table,
            chunk = rows.len(),
            inserted = inserted.len(),
            "Committed chunk"
        );
        Ok(inserted.len())
    }

    async fn existing(
        &self,
        fingerprints: &[Fingerprint],
    ) -> std::result::Result<HashSet<Fingerprint>, StoreError> {
        if fingerprints.is_empty() {
            return Ok(HashSet::new());
        }

        let keys: Vec<String> = fingerprints.iter().map(Fingerprint::to_hex).collect();
        let query = format!(
            "SELECT fingerprint FROM {} WHERE fingerprint = ANY($1)",
            self.table
        );
        let found: Vec<String> = sqlx::query_scalar(&query)
            .bind(&keys)
            .fetch_all(&self.pool)
            .await?;

        found
            .iter()
            .map(|hex| {
                hex.parse::<Fingerprint>()
                    .map_err(|e| StoreError::Corrupt(e.to_string()))
            })
            .collect()
    }

    async fn len(&self) -> std::result::Result<u64, StoreError> {
        let query = format!("SELECT COUNT(*) FROM {}", self.table);
        let count: i64 = sqlx::query_scalar(&query).fetch_one(&self.pool).await?;
        Ok(count.max(0) as u64)
    }

    async fn get(&self, fingerprint: &Fingerprint) -> std::result::Result<Option<Row>, StoreError> {
        let query = format!("SELECT row_data FROM {} WHERE fingerprint = $1", self.table);
        let data: Option<serde_json::Value> = sqlx::query_scalar(&query)
            .bind(fingerprint.to_hex())
            .fetch_optional(&self.pool)
            .await?;

        data.map(|json| {
            Row::from_json(&self.schema, &json).map_err(|e| StoreError::Corrupt(e.to_string()))
        })
        .transpose()
    }
}
