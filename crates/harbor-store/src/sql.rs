//! Conversions between harbor values and rusqlite, and the write statements.

use harbor_core::query::ident;
use harbor_core::{Record, SqlValue};
use rusqlite::types::{Value as SqliteValue, ValueRef};
use serde_json::Value;

use crate::error::Result;

/// Bindable form of a [`SqlValue`].
pub(crate) fn bind(value: &SqlValue) -> SqliteValue {
    match value {
        SqlValue::Null => SqliteValue::Null,
        SqlValue::Integer(i) => SqliteValue::Integer(*i),
        SqlValue::Real(f) => SqliteValue::Real(*f),
        SqlValue::Text(s) => SqliteValue::Text(s.clone()),
        SqlValue::Blob(b) => SqliteValue::Blob(b.to_vec()),
    }
}

pub(crate) fn bind_all(values: &[SqlValue]) -> Vec<SqliteValue> {
    values.iter().map(bind).collect()
}

/// Read one column of a result row back into JSON.
///
/// Blobs are rendered as lowercase hex; non-finite reals become null.
pub(crate) fn column_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(hex::encode(b)),
    }
}

/// Collect every row of a prepared statement into records.
pub(crate) fn collect_records(
    stmt: &mut rusqlite::Statement<'_>,
    params: &[SqlValue],
) -> Result<Vec<Record>> {
    let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let mut rows = stmt.query(rusqlite::params_from_iter(bind_all(params)))?;

    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut record = Record::new();
        for (i, name) in names.iter().enumerate() {
            record.insert(name.clone(), column_value(row.get_ref(i)?));
        }
        out.push(record);
    }
    Ok(out)
}

/// `INSERT INTO t (a, b) VALUES (?, ?)` with its parameters.
pub(crate) fn insert_statement(table: &str, row: &Record) -> Result<(String, Vec<SqlValue>)> {
    let mut columns = Vec::with_capacity(row.len());
    let mut params = Vec::with_capacity(row.len());
    for (column, value) in row {
        columns.push(ident(column)?);
        params.push(SqlValue::from_json(value));
    }

    let sql = if columns.is_empty() {
        format!("INSERT INTO {} DEFAULT VALUES", ident(table)?)
    } else {
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            ident(table)?,
            columns.join(", "),
            vec!["?"; columns.len()].join(", ")
        )
    };
    Ok((sql, params))
}

/// `UPDATE t SET a = ?, b = ? WHERE id = ?` with its parameters.
///
/// Returns `None` when the row has nothing to set besides the identity.
pub(crate) fn update_statement(
    table: &str,
    id_attribute: &str,
    row: &Record,
    id: &SqlValue,
) -> Result<Option<(String, Vec<SqlValue>)>> {
    let mut sets = Vec::with_capacity(row.len());
    let mut params = Vec::with_capacity(row.len() + 1);
    for (column, value) in row {
        if column == id_attribute {
            continue;
        }
        sets.push(format!("{} = ?", ident(column)?));
        params.push(SqlValue::from_json(value));
    }
    if sets.is_empty() {
        return Ok(None);
    }
    params.push(id.clone());

    let sql = format!(
        "UPDATE {} SET {} WHERE {} = ?",
        ident(table)?,
        sets.join(", "),
        ident(id_attribute)?
    );
    Ok(Some((sql, params)))
}
