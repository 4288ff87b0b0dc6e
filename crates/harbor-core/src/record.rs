//! Records and row identities.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::value::SqlValue;

/// An ordered mapping from column name to value.
///
/// Scalars are stored as-is; structured values are serialized to JSON text
/// when they are written to the local store.
pub type Record = serde_json::Map<String, Value>;

/// A normalised row identity.
///
/// Servers are not consistent about identity types: the same row may arrive
/// as `4` in one payload and `"4"` in another. Identities that parse as an
/// integer are therefore always compared as integers.
///
/// Serializes as a bare JSON number or string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Identity {
    Integer(i64),
    Text(String),
}

impl Identity {
    /// Normalise a JSON value into an identity.
    ///
    /// Returns `None` for null, empty strings, booleans and structured values.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(Identity::Integer).or_else(|| {
                n.as_f64()
                    .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                    .map(|f| Identity::Integer(f as i64))
            }),
            Value::String(s) if s.is_empty() => None,
            Value::String(s) => Some(Self::from_text(s)),
            _ => None,
        }
    }

    /// Normalise a bound SQL value into an identity.
    pub fn from_sql(value: &SqlValue) -> Option<Self> {
        match value {
            SqlValue::Integer(i) => Some(Identity::Integer(*i)),
            SqlValue::Real(f) if f.fract() == 0.0 => Some(Identity::Integer(*f as i64)),
            SqlValue::Text(s) if !s.is_empty() => Some(Self::from_text(s)),
            _ => None,
        }
    }

    /// Only the canonical spelling of an integer becomes `Integer`; `"0042"`
    /// or `"+7"` stay text so they bind against the row that holds them.
    fn from_text(s: &str) -> Self {
        match s.parse::<i64>() {
            Ok(i) if i.to_string() == s => Identity::Integer(i),
            _ => Identity::Text(s.to_string()),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Identity::Integer(i) => Value::from(*i),
            Identity::Text(s) => Value::String(s.clone()),
        }
    }

    pub fn to_sql(&self) -> SqlValue {
        match self {
            Identity::Integer(i) => SqlValue::Integer(*i),
            Identity::Text(s) => SqlValue::Text(s.clone()),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::Integer(i) => write!(f, "{}", i),
            Identity::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for Identity {
    fn from(v: i64) -> Self {
        Identity::Integer(v)
    }
}

impl From<&str> for Identity {
    fn from(v: &str) -> Self {
        Identity::from_text(v)
    }
}

/// Read the identity of a record.
pub fn identity_of(record: &Record, id_attribute: &str) -> Option<Identity> {
    record.get(id_attribute).and_then(Identity::from_json)
}

/// Whether an incoming record carries a truthy tombstone marker.
pub fn is_tombstone(record: &Record, marker: &str) -> bool {
    match record.get(marker) {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Some(Value::String(s)) => matches!(s.to_ascii_lowercase().as_str(), "1" | "true"),
        _ => false,
    }
}

/// Generate a fresh locally-assigned identity.
pub fn generate_identity() -> String {
    uuid::Uuid::new_v4().to_string()
}
