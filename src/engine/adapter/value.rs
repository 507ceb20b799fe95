//! Conversion between SQLite values and JSON record fields
//!
//! Blobs travel as `{"$blob": "<base64>"}` so that a row read from the store
//! and written back keeps its storage class.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rusqlite::types::{ToSqlOutput, Value as SqliteValue, ValueRef};
use rusqlite::ToSql;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

const BLOB_TAG: &str = "$blob";

/// SQL value for parameterized statements
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl SqlValue {
    /// Map a record field to a bind parameter.
    ///
    /// Booleans become 0/1, nested arrays and objects are stored as JSON text.
    pub fn from_json(value: &Value) -> Result<Self, String> {
        Ok(match value {
            Value::Null => SqlValue::Null,
            Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    SqlValue::Integer(i)
                } else if let Some(f) = n.as_f64() {
                    SqlValue::Real(f)
                } else {
                    return Err(format!("number out of range: {}", n));
                }
            }
            Value::String(s) => SqlValue::Text(s.clone()),
            Value::Object(map) if map.len() == 1 && map.contains_key(BLOB_TAG) => {
                let encoded = map[BLOB_TAG]
                    .as_str()
                    .ok_or_else(|| "blob payload must be a base64 string".to_string())?;
                let bytes = STANDARD
                    .decode(encoded)
                    .map_err(|e| format!("invalid blob payload: {}", e))?;
                SqlValue::Blob(bytes)
            }
            Value::Array(_) | Value::Object(_) => SqlValue::Text(value.to_string()),
        })
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Owned(SqliteValue::Null),
            SqlValue::Integer(i) => ToSqlOutput::Owned(SqliteValue::Integer(*i)),
            SqlValue::Real(f) => ToSqlOutput::Owned(SqliteValue::Real(*f)),
            SqlValue::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            SqlValue::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
        })
    }
}

/// Convert a rusqlite ValueRef to a serde_json Value
pub fn value_ref_to_json(val: ValueRef<'_>) -> Value {
    match val {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => json!(i),
        ValueRef::Real(f) => json!(f),
        ValueRef::Text(t) => json!(String::from_utf8_lossy(t).to_string()),
        ValueRef::Blob(b) => {
            let mut tagged = serde_json::Map::new();
            tagged.insert(BLOB_TAG.to_string(), Value::String(STANDARD.encode(b)));
            Value::Object(tagged)
        }
    }
}

/// Canonical lookup key for a primary or foreign key value.
///
/// `"1"` and `1` produce different keys, matching how the snapshot stores them.
pub fn key_of(value: &Value) -> String {
    value.to_string()
}

/// Human-readable form of a key value, used for audit entity ids and messages
pub fn display_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_round_trip() {
        let json = value_ref_to_json(ValueRef::Blob(&[0, 159, 146, 150]));
        assert!(json.get(BLOB_TAG).is_some());
        assert_eq!(
            SqlValue::from_json(&json).unwrap(),
            SqlValue::Blob(vec![0, 159, 146, 150])
        );
    }

    #[test]
    fn test_scalar_mapping() {
        assert_eq!(SqlValue::from_json(&json!(null)).unwrap(), SqlValue::Null);
        assert_eq!(SqlValue::from_json(&json!(true)).unwrap(), SqlValue::Integer(1));
        assert_eq!(SqlValue::from_json(&json!(42)).unwrap(), SqlValue::Integer(42));
        assert_eq!(SqlValue::from_json(&json!(1.5)).unwrap(), SqlValue::Real(1.5));
        assert_eq!(
            SqlValue::from_json(&json!({"a": 1})).unwrap(),
            SqlValue::Text("{\"a\":1}".into())
        );
    }

    #[test]
    fn test_keys_distinguish_types() {
        assert_ne!(key_of(&json!("1")), key_of(&json!(1)));
        assert_eq!(display_key(&json!("S1")), "S1");
        assert_eq!(display_key(&json!(7)), "7");
    }
}
