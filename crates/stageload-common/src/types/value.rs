//! Typed scalar values and field coercion

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};
use std::fmt;

use super::ColumnType;

/// Naive timestamp layouts accepted by [`ColumnType::coerce`], tried in order.
///
/// Naive values are interpreted as UTC.
const NAIVE_TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// A single typed scalar
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Timestamp(DateTime<Utc>),
    Null,
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Type of the value, `None` for null
    pub fn column_type(&self) -> Option<ColumnType> {
        match self {
            Value::String(_) => Some(ColumnType::String),
            Value::Integer(_) => Some(ColumnType::Integer),
            Value::Float(_) => Some(ColumnType::Float),
            Value::Boolean(_) => Some(ColumnType::Boolean),
            Value::Timestamp(_) => Some(ColumnType::Timestamp),
            Value::Null => None,
        }
    }

    /// Convert to a plain JSON value.
    ///
    /// Timestamps become RFC 3339 strings with microsecond precision.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Integer(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Boolean(b) => serde_json::Value::Bool(*b),
            Value::Timestamp(ts) => {
                serde_json::Value::String(ts.to_rfc3339_opts(SecondsFormat::Nanos, true))
            },
            Value::Null => serde_json::Value::Null,
        }
    }

    /// Rebuild a value of the given type from its JSON form
    pub fn from_json(column_type: ColumnType, json: &serde_json::Value) -> Result<Self, CoerceError> {
        match json {
            serde_json::Value::Null => Ok(Value::Null),
            serde_json::Value::String(s) => column_type.coerce(s),
            serde_json::Value::Bool(b) if column_type == ColumnType::Boolean => {
                Ok(Value::Boolean(*b))
            },
            serde_json::Value::Number(n) => match column_type {
                ColumnType::Integer => n
                    .as_i64()
                    .map(Value::Integer)
                    .ok_or_else(|| CoerceError::new(column_type, n.to_string())),
                ColumnType::Float => n
                    .as_f64()
                    .map(Value::Float)
                    .ok_or_else(|| CoerceError::new(column_type, n.to_string())),
                _ => column_type.coerce(&n.to_string()),
            },
            other => Err(CoerceError::new(column_type, other.to_string())),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{}", s),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Timestamp(ts) => write!(f, "{}", ts.to_rfc3339_opts(SecondsFormat::Nanos, true)),
            Value::Null => write!(f, "null"),
        }
    }
}

impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_json().serialize(serializer)
    }
}

/// A raw field could not be converted to its declared column type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot coerce '{raw}' to {expected}")]
pub struct CoerceError {
    pub expected: ColumnType,
    pub raw: String,
}

impl CoerceError {
    pub fn new(expected: ColumnType, raw: impl Into<String>) -> Self {
        Self {
            expected,
            raw: raw.into(),
        }
    }
}

impl ColumnType {
    /// Coerce a raw text field to this type.
    ///
    /// Surrounding whitespace is ignored and an empty field yields [`Value::Null`];
    /// whether null is acceptable is the caller's decision.
    pub fn coerce(self, raw: &str) -> Result<Value, CoerceError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(Value::Null);
        }

        match self {
            ColumnType::String => Ok(Value::String(trimmed.to_string())),
            ColumnType::Integer => trimmed
                .parse::<i64>()
                .map(Value::Integer)
                .map_err(|_| CoerceError::new(self, raw)),
            ColumnType::Float => match trimmed.parse::<f64>() {
                Ok(x) if x.is_finite() => Ok(Value::Float(x)),
                _ => Err(CoerceError::new(self, raw)),
            },
            ColumnType::Boolean => match trimmed.to_ascii_lowercase().as_str() {
                "true" | "t" | "1" | "y" | "yes" => Ok(Value::Boolean(true)),
                "false" | "f" | "0" | "n" | "no" => Ok(Value::Boolean(false)),
                _ => Err(CoerceError::new(self, raw)),
            },
            ColumnType::Timestamp => parse_timestamp(trimmed)
                .map(Value::Timestamp)
                .ok_or_else(|| CoerceError::new(self, raw)),
        }
    }
}

/// Parse the timestamp layouts seen in flat-file exports
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }

    for format in NAIVE_TIMESTAMP_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(naive.and_utc());
        }
    }

    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_coerce_trims_and_nulls() {
        assert_eq!(
            ColumnType::String.coerce("  abc ").unwrap(),
            Value::String("abc".to_string())
        );
        assert_eq!(ColumnType::Integer.coerce("   ").unwrap(), Value::Null);
        assert_eq!(ColumnType::Integer.coerce(" 42").unwrap(), Value::Integer(42));
    }

    #[test]
    fn test_coerce_rejects_non_numeric() {
        let err = ColumnType::Integer.coerce("ten").unwrap_err();
        assert_eq!(err.expected, ColumnType::Integer);
        assert_eq!(err.raw, "ten");

        assert!(ColumnType::Float.coerce("abc").is_err());
        assert!(ColumnType::Float.coerce("NaN").is_err());
        assert!(ColumnType::Float.coerce("inf").is_err());
    }

    #[test]
    fn test_coerce_boolean_spellings() {
        assert_eq!(ColumnType::Boolean.coerce("Y").unwrap(), Value::Boolean(true));
        assert_eq!(ColumnType::Boolean.coerce("no").unwrap(), Value::Boolean(false));
        assert!(ColumnType::Boolean.coerce("maybe").is_err());
    }

    #[test]
    fn test_timestamp_layouts_agree() {
        let expected = Utc.with_ymd_and_hms(2019, 1, 1, 0, 5, 0).unwrap();
        for raw in [
            "2019-01-01T00:05:00",
            "2019-01-01 00:05:00",
            "2019-01-01T00:05:00.000",
            "2019-01-01T00:05:00Z",
            "2019-01-01T01:05:00+01:00",
            "2019-01-01 00:05",
        ] {
            assert_eq!(parse_timestamp(raw), Some(expected), "layout {raw}");
        }
        assert_eq!(
            parse_timestamp("2019-01-01"),
            Some(Utc.with_ymd_and_hms(2019, 1, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(parse_timestamp("01/01/2019"), None);
    }

    #[test]
    fn test_json_conversion() {
        let ts = Value::Timestamp(Utc.with_ymd_and_hms(2019, 1, 1, 0, 0, 0).unwrap());
        let json = ts.to_json();
        assert_eq!(json, serde_json::json!("2019-01-01T00:00:00.000000000Z"));
        assert_eq!(Value::from_json(ColumnType::Timestamp, &json).unwrap(), ts);

        let precise = ColumnType::Timestamp.coerce("2019-01-01 00:00:00.123456789").unwrap();
        let json = precise.to_json();
        assert_eq!(json, serde_json::json!("2019-01-01T00:00:00.123456789Z"));
        assert_eq!(Value::from_json(ColumnType::Timestamp, &json).unwrap(), precise);

        assert_eq!(
            Value::from_json(ColumnType::Float, &serde_json::json!(10.0)).unwrap(),
            Value::Float(10.0)
        );
        assert_eq!(
            Value::from_json(ColumnType::Integer, &serde_json::Value::Null).unwrap(),
            Value::Null
        );
    }
}
