//! Row fingerprints
//!
//! A fingerprint is the SHA-256 of a canonical encoding of selected columns.
//! Each value is written as `tag:len:bytes;` so the concatenation is
//! unambiguous even when values contain the separator characters. Values are
//! canonicalized before encoding:
//!
//! - strings are trimmed
//! - floats use the shortest round-trip decimal, with `-0` folded into `0`
//! - timestamps use fixed-width UTC, `YYYY-MM-DDTHH:MM:SS.fffffffffZ`
//! - null is the bare tag `N`

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use stageload_common::types::{Row, Schema, Value};
use std::fmt;
use std::str::FromStr;

use crate::error::{LoadError, Result};

const TIMESTAMP_CANONICAL_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.9fZ";

/// SHA-256 digest identifying a row's logical identity
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", &self.to_hex()[..12])
    }
}

impl FromStr for Fingerprint {
    type Err = LoadError;

    fn from_str(s: &str) -> Result<Self> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s.trim(), &mut bytes)
            .map_err(|e| LoadError::config(format!("invalid fingerprint '{}': {}", s, e)))?;
        Ok(Self(bytes))
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Append the canonical encoding of one value
pub fn encode_canonical(value: &Value, out: &mut Vec<u8>) {
    let (tag, payload): (u8, Option<String>) = match value {
        Value::String(s) => (b'S', Some(s.trim().to_string())),
        Value::Integer(i) => (b'I', Some(i.to_string())),
        Value::Float(x) => {
            let x = if *x == 0.0 { 0.0 } else { *x };
            (b'F', Some(x.to_string()))
        },
        Value::Boolean(b) => (b'B', Some(b.to_string())),
        Value::Timestamp(ts) => (b'T', Some(ts.format(TIMESTAMP_CANONICAL_FORMAT).to_string())),
        Value::Null => (b'N', None),
    };

    out.push(tag);
    if let Some(payload) = payload {
        out.push(b':');
        out.extend_from_slice(payload.len().to_string().as_bytes());
        out.push(b':');
        out.extend_from_slice(payload.as_bytes());
    }
    out.push(b';');
}

/// Fingerprint a sequence of values in order
pub fn fingerprint_values<'a>(values: impl IntoIterator<Item = &'a Value>) -> Fingerprint {
    let mut buffer = Vec::with_capacity(64);
    for value in values {
        encode_canonical(value, &mut buffer);
    }
    Fingerprint(Sha256::digest(&buffer).into())
}

/// Computes fingerprints over a fixed set of schema columns
#[derive(Debug, Clone)]
pub struct Fingerprinter {
    columns: Vec<String>,
    indices: Vec<usize>,
}

impl Fingerprinter {
    /// Resolve fingerprint columns against a schema.
    ///
    /// An empty column list fingerprints every column in schema order.
    pub fn new(schema: &Schema, columns: &[String]) -> Result<Self> {
        if columns.is_empty() {
            return Ok(Self {
                columns: schema.column_names().map(str::to_string).collect(),
                indices: (0..schema.len()).collect(),
            });
        }

        let mut indices = Vec::with_capacity(columns.len());
        for column in columns {
            let index = schema.index_of(column).ok_or_else(|| {
                LoadError::config(format!("fingerprint column '{}' is not in the schema", column))
            })?;
            if indices.contains(&index) {
                return Err(LoadError::config(format!(
                    "fingerprint column '{}' listed twice",
                    column
                )));
            }
            indices.push(index);
        }

        Ok(Self {
            columns: columns.to_vec(),
            indices,
        })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Fingerprint a row laid out in the schema this fingerprinter was built from
    pub fn fingerprint(&self, row: &Row) -> Fingerprint {
        let fields = row.fields();
        fingerprint_values(
            self.indices
                .iter()
                .map(|&i| fields.get(i).map(|(_, v)| v).unwrap_or(&Value::Null)),
        )
    }
}
