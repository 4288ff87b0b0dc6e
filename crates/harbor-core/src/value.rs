//! Bindable SQL values.

use bytes::Bytes;
use serde_json::Value;

/// A value bound to a `?` placeholder.
///
/// Mirrors SQLite's storage classes. Booleans have no class of their own and
/// are stored as `Integer(1)` / `Integer(0)`.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Bytes),
}

impl SqlValue {
    /// Convert a JSON value into its bound form.
    ///
    /// Arrays and objects have no scalar representation and are serialized to
    /// JSON text before binding.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => SqlValue::Null,
            Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
            Value::Number(n) => match n.as_i64() {
                Some(i) => SqlValue::Integer(i),
                None => n.as_f64().map(SqlValue::Real).unwrap_or(SqlValue::Null),
            },
            Value::String(s) => SqlValue::Text(s.clone()),
            Value::Array(_) | Value::Object(_) => SqlValue::Text(value.to_string()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Integer(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::Integer(i64::from(v))
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Real(v)
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Integer(i64::from(v))
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<Bytes> for SqlValue {
    fn from(v: Bytes) -> Self {
        SqlValue::Blob(v)
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(v: Vec<u8>) -> Self {
        SqlValue::Blob(Bytes::from(v))
    }
}

impl From<&Value> for SqlValue {
    fn from(v: &Value) -> Self {
        SqlValue::from_json(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_scalars() {
        assert_eq!(SqlValue::from_json(&json!(null)), SqlValue::Null);
        assert_eq!(SqlValue::from_json(&json!(true)), SqlValue::Integer(1));
        assert_eq!(SqlValue::from_json(&json!(false)), SqlValue::Integer(0));
        assert_eq!(SqlValue::from_json(&json!(42)), SqlValue::Integer(42));
        assert_eq!(SqlValue::from_json(&json!(1.5)), SqlValue::Real(1.5));
        assert_eq!(
            SqlValue::from_json(&json!("Merlot")),
            SqlValue::Text("Merlot".into())
        );
    }

    #[test]
    fn test_structured_values_become_json_text() {
        let v = SqlValue::from_json(&json!({"grapes": ["Merlot", "Malbec"]}));
        assert_eq!(
            v,
            SqlValue::Text(r#"{"grapes":["Merlot","Malbec"]}"#.into())
        );

        let v = SqlValue::from_json(&json!([1, 2]));
        assert_eq!(v, SqlValue::Text("[1,2]".into()));
    }
}
