//! Extract: read a source file and coerce it against a declared schema
//!
//! Sources are CSV with a header row, optionally gzip-compressed. Headers are
//! matched to schema columns by name or alias; extra headers are ignored.
//! Nothing durable is touched here.

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use stageload_common::checksum::{compute_bytes_checksum, ExpectedChecksum};
use stageload_common::types::{ChecksumAlgorithm, Row, Schema, Value};
use std::io::Read;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::{LoadError, Result};
use crate::source::SourceStore;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Parsing knobs for [`extract`]
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// Stop after this many data rows
    pub max_rows: Option<usize>,
    pub delimiter: u8,
    /// Published digest of the raw source; a mismatch fails the extract
    pub expected_checksum: Option<ExpectedChecksum>,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            max_rows: None,
            delimiter: b',',
            expected_checksum: None,
        }
    }
}

/// Rows extracted from one source plus their provenance.
///
/// Immutable once built.
#[derive(Debug, Clone)]
pub struct Batch {
    id: Uuid,
    source: String,
    extracted_at: DateTime<Utc>,
    source_checksum: String,
    schema: Arc<Schema>,
    rows: Vec<Row>,
    lines: Vec<u64>,
}

impl Batch {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn extracted_at(&self) -> DateTime<Utc> {
        self.extracted_at
    }

    /// SHA-256 of the raw source bytes (before decompression)
    pub fn source_checksum(&self) -> &str {
        &self.source_checksum
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Source line number of the row at `index`
    pub fn line_of(&self, index: usize) -> Option<u64> {
        self.lines.get(index).copied()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Read `location` from `source` and coerce every field to `schema`
#[instrument(skip(source, schema, options), fields(source_kind = source.kind()))]
pub async fn extract(
    source: &dyn SourceStore,
    location: &str,
    schema: Arc<Schema>,
    options: &ExtractOptions,
) -> Result<Batch> {
    let bytes = source.read(location).await?;
    let batch = parse_batch(&bytes, location, schema, options)?;

    info!(
        batch_id = %batch.id(),
        rows = batch.len(),
        checksum = %batch.source_checksum(),
        "Extracted batch"
    );
    Ok(batch)
}

/// Parse raw source bytes into a batch
pub fn parse_batch(
    bytes: &[u8],
    location: &str,
    schema: Arc<Schema>,
    options: &ExtractOptions,
) -> Result<Batch> {
    if let Some(ref expected) = options.expected_checksum {
        expected.verify(bytes)?;
    }
    let source_checksum = compute_bytes_checksum(bytes, ChecksumAlgorithm::Sha256);
    let reader: Box<dyn Read + '_> = if bytes.starts_with(&GZIP_MAGIC) {
        debug!(location, "Decompressing gzip source");
        Box::new(GzDecoder::new(bytes))
    } else {
        Box::new(bytes)
    };

    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .delimiter(options.delimiter)
        .from_reader(reader);

    let headers = csv_reader
        .headers()
        .map_err(header_error)?
        .clone();
    let mapping = map_headers(&schema, &headers)?;

    let mut rows = Vec::new();
    let mut lines = Vec::new();
    let mut record = csv::StringRecord::new();

    loop {
        if options.max_rows.is_some_and(|max| rows.len() >= max) {
            info!(max_rows = rows.len(), "Row cap reached, stopping extract");
            break;
        }

        let more = csv_reader
            .read_record(&mut record)
            .map_err(record_error)?;
        if !more {
            break;
        }

        let line = record.position().map(|p| p.line()).unwrap_or(0);
        rows.push(coerce_record(&schema, &mapping, &record, line)?);
        lines.push(line);
    }

    Ok(Batch {
        id: Uuid::new_v4(),
        source: location.to_string(),
        extracted_at: Utc::now(),
        source_checksum,
        schema,
        rows,
        lines,
    })
}

/// For each schema column, the index of the header that feeds it
fn map_headers(schema: &Schema, headers: &csv::StringRecord) -> Result<Vec<Option<usize>>> {
    let mut mapping = Vec::with_capacity(schema.len());

    for column in &schema.columns {
        let index = headers.iter().position(|h| column.matches_header(h));
        match index {
            Some(i) => mapping.push(Some(i)),
            None if column.nullable => {
                warn!(column = %column.name, "Column missing from source header, filling with nulls");
                mapping.push(None);
            },
            None => {
                return Err(LoadError::schema_mismatch(
                    1,
                    &column.name,
                    "required column missing from header",
                ))
            },
        }
    }

    let unused = headers
        .iter()
        .filter(|h| !schema.columns.iter().any(|c| c.matches_header(h)))
        .count();
    if unused > 0 {
        debug!(unused, "Ignoring source columns not in schema");
    }

    Ok(mapping)
}

fn coerce_record(
    schema: &Schema,
    mapping: &[Option<usize>],
    record: &csv::StringRecord,
    line: u64,
) -> Result<Row> {
    let mut fields = Vec::with_capacity(schema.len());

    for (column, index) in schema.columns.iter().zip(mapping) {
        let value = match index.and_then(|i| record.get(i)) {
            Some(raw) => column
                .column_type
                .coerce(raw)
                .map_err(|e| LoadError::schema_mismatch(line, &column.name, e))?,
            None => Value::Null,
        };

        if value.is_null() && !column.nullable {
            return Err(LoadError::schema_mismatch(
                line,
                &column.name,
                "empty value in non-nullable column",
            ));
        }

        fields.push((column.name.clone(), value));
    }

    Ok(Row::new(fields))
}

// Source bytes are fully in memory; a read error here is a truncated or
// invalid gzip payload.
fn header_error(e: csv::Error) -> LoadError {
    if matches!(e.kind(), csv::ErrorKind::Io(_)) {
        LoadError::schema_mismatch(1, "<gzip>", e)
    } else {
        LoadError::schema_mismatch(1, "<header>", e)
    }
}

fn record_error(e: csv::Error) -> LoadError {
    let line = e.position().map(|p| p.line()).unwrap_or(0);
    let unequal = match e.kind() {
        csv::ErrorKind::UnequalLengths {
            expected_len, len, ..
        } => Some((*expected_len, *len)),
        _ => None,
    };

    if matches!(e.kind(), csv::ErrorKind::Io(_)) {
        LoadError::schema_mismatch(line, "<gzip>", e)
    } else if let Some((expected, found)) = unequal {
        LoadError::schema_mismatch(
            line,
            "<record>",
            format!("expected {} fields, found {}", expected, found),
        )
    } else {
        LoadError::schema_mismatch(line, "<record>", e)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use stageload_common::types::{ColumnSpec, ColumnType};
    use stageload_common::StageloadError;
    use std::io::Write;

    fn trips_schema() -> Arc<Schema> {
        Arc::new(
            Schema::new(vec![
                ColumnSpec::new("id", ColumnType::Integer).required(),
                ColumnSpec::new("ts", ColumnType::Timestamp).with_alias("tpep_pickup_datetime"),
                ColumnSpec::new("amt", ColumnType::Float),
            ])
            .unwrap(),
        )
    }

    #[test]
    fn test_parse_coerces_rows_in_schema_order() {
        let csv = "amt,id,ts\n10.0,1,2019-01-01T00:00:00\n5,2,2019-01-01 00:05:00\n";
        let batch = parse_batch(csv.as_bytes(), "trips.csv", trips_schema(), &Default::default())
            .unwrap();

        assert_eq!(batch.len(), 2);
        assert_eq!(batch.source(), "trips.csv");
        let first = batch.rows()[0].fields();
        assert_eq!(first[0], ("id".to_string(), Value::Integer(1)));
        assert_eq!(first[2], ("amt".to_string(), Value::Float(10.0)));
        assert_eq!(batch.line_of(0), Some(2));
        assert_eq!(batch.line_of(1), Some(3));
        assert_eq!(batch.source_checksum().len(), 64);
    }

    #[test]
    fn test_non_numeric_field_is_schema_mismatch() {
        let csv = "id,ts,amt\n1,2019-01-01T00:00:00,ten\n";
        let err = parse_batch(csv.as_bytes(), "bad.csv", trips_schema(), &Default::default())
            .unwrap_err();

        match err {
            LoadError::SchemaMismatch { line, column, .. } => {
                assert_eq!(line, 2);
                assert_eq!(column, "amt");
            },
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_required_column_rules() {
        let missing_header = "ts,amt\n2019-01-01,1\n";
        assert!(matches!(
            parse_batch(missing_header.as_bytes(), "a", trips_schema(), &Default::default()),
            Err(LoadError::SchemaMismatch { line: 1, .. })
        ));

        let empty_value = "id,ts,amt\n ,2019-01-01,1\n";
        assert!(matches!(
            parse_batch(empty_value.as_bytes(), "a", trips_schema(), &Default::default()),
            Err(LoadError::SchemaMismatch { line: 2, .. })
        ));
    }

    #[test]
    fn test_alias_and_missing_nullable_column() {
        let csv = "id,tpep_pickup_datetime,extra\n7,2019-01-01T00:00:00,x\n";
        let batch = parse_batch(csv.as_bytes(), "a", trips_schema(), &Default::default()).unwrap();
        let row = &batch.rows()[0];
        assert!(matches!(row.get("ts"), Some(Value::Timestamp(_))));
        assert_eq!(row.get("amt"), Some(&Value::Null));
        assert_eq!(row.get("extra"), None);
    }

    #[test]
    fn test_ragged_record_is_rejected() {
        let csv = "id,ts,amt\n1,2019-01-01\n";
        assert!(matches!(
            parse_batch(csv.as_bytes(), "a", trips_schema(), &Default::default()),
            Err(LoadError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn test_gzip_and_row_cap() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(b"id,ts,amt\n1,2019-01-01,1\n2,2019-01-02,2\n3,2019-01-03,3\n")
            .unwrap();
        let compressed = encoder.finish().unwrap();

        let options = ExtractOptions {
            max_rows: Some(2),
            ..Default::default()
        };
        let batch = parse_batch(&compressed, "t.csv.gz", trips_schema(), &options).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.rows()[1].get("id"), Some(&Value::Integer(2)));
    }

    #[test]
    fn test_truncated_gzip_is_not_retryable() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"id,ts,amt\n").unwrap();
        for i in 0..2000 {
            writeln!(encoder, "{},2019-01-01T00:{:02}:00,{}.5", i, i % 60, i).unwrap();
        }
        let full = encoder.finish().unwrap();
        let truncated = &full[..full.len() / 2];

        let err = parse_batch(truncated, "t.csv.gz", trips_schema(), &Default::default())
            .unwrap_err();
        match err {
            LoadError::SchemaMismatch { ref column, .. } => assert_eq!(column, "<gzip>"),
            ref other => panic!("unexpected error: {other:?}"),
        }
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_custom_delimiter() {
        let csv = "id;ts;amt\n1;2019-01-01T00:00:00;2.5\n";
        let options = ExtractOptions {
            delimiter: b';',
            ..Default::default()
        };
        let batch = parse_batch(csv.as_bytes(), "a", trips_schema(), &options).unwrap();
        assert_eq!(batch.rows()[0].get("id"), Some(&Value::Integer(1)));
        assert_eq!(batch.rows()[0].get("amt"), Some(&Value::Float(2.5)));

        // Commas are plain field content under ';'
        assert!(matches!(
            parse_batch("id;ts;amt\n1;2019-01-01;2,5\n".as_bytes(), "a", trips_schema(), &options),
            Err(LoadError::SchemaMismatch { .. })
        ));

        let tabs = "id\tts\tamt\n3\t2019-01-01\t4.0\n";
        let options = ExtractOptions {
            delimiter: b'\t',
            ..Default::default()
        };
        let batch = parse_batch(tabs.as_bytes(), "a", trips_schema(), &options).unwrap();
        assert_eq!(batch.rows()[0].get("amt"), Some(&Value::Float(4.0)));
    }

    #[test]
    fn test_expected_checksum_is_enforced() {
        let csv = b"id,ts,amt\n1,2019-01-01,1\n";
        let checksum = compute_bytes_checksum(csv, ChecksumAlgorithm::Sha256);

        let matching = ExtractOptions {
            expected_checksum: Some(format!("sha256:{}", checksum.to_uppercase()).parse().unwrap()),
            ..Default::default()
        };
        assert!(parse_batch(csv, "a", trips_schema(), &matching).is_ok());

        let sha512 = compute_bytes_checksum(csv, ChecksumAlgorithm::Sha512);
        let matching = ExtractOptions {
            expected_checksum: Some(format!("sha512:{}", sha512).parse().unwrap()),
            ..Default::default()
        };
        assert!(parse_batch(csv, "a", trips_schema(), &matching).is_ok());

        let wrong = ExtractOptions {
            expected_checksum: Some(format!("sha256:{}", "00".repeat(32)).parse().unwrap()),
            ..Default::default()
        };
        assert!(matches!(
            parse_batch(csv, "a", trips_schema(), &wrong),
            Err(LoadError::Common(StageloadError::ChecksumMismatch { .. }))
        ));
    }
}
