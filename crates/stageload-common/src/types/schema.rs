//! Column schema declarations and rows
//!
//! A schema is always declared up front (YAML or JSON) and never inferred
//! from data. Source headers are matched against column names and aliases.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use super::value::{CoerceError, Value};
use crate::error::{Result, StageloadError};

/// Declared type of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    #[serde(alias = "str", alias = "text")]
    String,
    #[serde(alias = "int", alias = "int64", alias = "bigint")]
    Integer,
    #[serde(alias = "float64", alias = "double")]
    Float,
    #[serde(alias = "bool")]
    Boolean,
    #[serde(alias = "datetime")]
    Timestamp,
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::String => write!(f, "string"),
            ColumnType::Integer => write!(f, "integer"),
            ColumnType::Float => write!(f, "float"),
            ColumnType::Boolean => write!(f, "boolean"),
            ColumnType::Timestamp => write!(f, "timestamp"),
        }
    }
}

fn default_nullable() -> bool {
    true
}

/// A single column declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    /// Column name in the target table
    pub name: String,

    #[serde(rename = "type")]
    pub column_type: ColumnType,

    /// Whether empty or missing values are accepted as null
    #[serde(default = "default_nullable")]
    pub nullable: bool,

    /// Alternative source header names mapped onto this column
    /// (e.g. `tpep_pickup_datetime` for `pickup_datetime`)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: true,
            aliases: Vec::new(),
        }
    }

    pub fn required(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    /// Whether a source header refers to this column
    pub fn matches_header(&self, header: &str) -> bool {
        let header = header.trim();
        self.name == header || self.aliases.iter().any(|a| a == header)
    }
}

/// Ordered, externally supplied column schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub columns: Vec<ColumnSpec>,
}

impl Schema {
    /// Build a schema, rejecting empty or ambiguous declarations
    pub fn new(columns: Vec<ColumnSpec>) -> Result<Self> {
        let schema = Self { columns };
        schema.validate()?;
        Ok(schema)
    }

    /// Load a schema from a `.yaml`/`.yml` or `.json` file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let schema: Schema = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&content)?,
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)?,
            _ => {
                return Err(StageloadError::Config(format!(
                    "unsupported schema file extension: {}",
                    path.display()
                )))
            },
        };
        schema.validate()?;
        Ok(schema)
    }

    /// Check that the schema is non-empty and every name and alias is unique
    pub fn validate(&self) -> Result<()> {
        if self.columns.is_empty() {
            return Err(StageloadError::Config("schema declares no columns".to_string()));
        }

        let mut seen = HashSet::new();
        for column in &self.columns {
            if column.name.trim().is_empty() {
                return Err(StageloadError::Config("column name cannot be empty".to_string()));
            }
            for name in std::iter::once(&column.name).chain(column.aliases.iter()) {
                if !seen.insert(name.as_str()) {
                    return Err(StageloadError::Config(format!(
                        "duplicate column name or alias: {}",
                        name
                    )));
                }
            }
        }

        Ok(())
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }
}

/// Ordered mapping from column name to value, in schema order
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    fields: Vec<(String, Value)>,
}

impl Row {
    pub fn new(fields: Vec<(String, Value)>) -> Self {
        Self { fields }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    pub fn fields(&self) -> &[(String, Value)] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Render as a JSON object keyed by column name
    pub fn to_json(&self) -> serde_json::Value {
        let map = self
            .fields
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect::<serde_json::Map<_, _>>();
        serde_json::Value::Object(map)
    }

    /// Rebuild a row from its JSON object form; absent columns become null
    pub fn from_json(
        schema: &Schema,
        json: &serde_json::Value,
    ) -> std::result::Result<Self, CoerceError> {
        let fields = schema
            .columns
            .iter()
            .map(|column| {
                let value = match json.get(&column.name) {
                    Some(v) => Value::from_json(column.column_type, v)?,
                    None => Value::Null,
                };
                Ok((column.name.clone(), value))
            })
            .collect::<std::result::Result<Vec<_>, CoerceError>>()?;
        Ok(Self { fields })
    }
}

impl Serialize for Row {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeMap;

        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}
