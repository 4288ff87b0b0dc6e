//! Structured filter descriptors.
//!
//! A [`Filter`] describes a query over one table: projection, equality and
//! inequality conditions, substring matches, set combinations, grouping,
//! ordering and paging. Conditions are an [`Expr`] tree.
//!
//! Callers that hold filters in JSON form (as they arrive from a UI layer or
//! a config file) go through [`Filter::from_json`]:
//!
//! ```json
//! {
//!   "select": ["name", "year"],
//!   "where": { "country": ["France", "Italy"], "year": 2012 },
//!   "whereNot": { "region": "Bordeaux" },
//!   "like": { "name": "CHATEAU" },
//!   "orderBy": "name",
//!   "limit": 20,
//!   "offset": 40
//! }
//! ```

use serde_json::Value;

use crate::error::{CoreError, Result};
use crate::value::SqlValue;

/// A condition tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// `col = value`
    Eq(String, SqlValue),
    /// `(col = v1 OR col = v2 ...)`
    OneOf(String, Vec<SqlValue>),
    And(Vec<Expr>),
    Or(Vec<Expr>),
}

impl Expr {
    pub fn eq(column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        Expr::Eq(column.into(), value.into())
    }

    pub fn one_of<V: Into<SqlValue>>(
        column: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Expr::OneOf(column.into(), values.into_iter().map(Into::into).collect())
    }

    /// AND `other` onto this expression, flattening nested ANDs.
    pub fn and(self, other: Expr) -> Self {
        match self {
            Expr::And(mut items) => {
                items.push(other);
                Expr::And(items)
            }
            first => Expr::And(vec![first, other]),
        }
    }
}

/// A query descriptor.
///
/// Empty vectors and `None` mean "clause absent". An absent `where_` still
/// yields `WHERE 1=1` when built.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    /// Table override. Mostly useful on nested set-combination filters.
    pub from: Option<String>,
    pub select: Vec<String>,
    pub where_: Option<Expr>,
    pub where_not: Option<Expr>,
    /// AND-joined `col LIKE %value%` pairs.
    pub like: Vec<(String, String)>,
    /// OR-joined `col LIKE %value%` pairs.
    pub like_or: Vec<(String, String)>,
    pub union: Option<Box<Filter>>,
    pub union_all: Option<Box<Filter>>,
    pub intersect: Option<Box<Filter>>,
    pub except: Option<Box<Filter>>,
    pub group_by: Vec<String>,
    pub order_by: Vec<String>,
    pub limit: Option<u64>,
    /// Ignored unless `limit` is set.
    pub offset: Option<u64>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_table(mut self, table: impl Into<String>) -> Self {
        self.from = Some(table.into());
        self
    }

    pub fn select<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.select = columns.into_iter().map(Into::into).collect();
        self
    }

    /// AND an arbitrary condition into the WHERE clause.
    pub fn where_expr(mut self, expr: Expr) -> Self {
        self.where_ = Some(match self.where_.take() {
            Some(existing) => existing.and(expr),
            None => expr,
        });
        self
    }

    pub fn where_eq(self, column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.where_expr(Expr::eq(column, value))
    }

    pub fn where_one_of<V: Into<SqlValue>>(
        self,
        column: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.where_expr(Expr::one_of(column, values))
    }

    /// AND a condition into the negated clause.
    pub fn where_not(mut self, expr: Expr) -> Self {
        self.where_not = Some(match self.where_not.take() {
            Some(existing) => existing.and(expr),
            None => expr,
        });
        self
    }

    pub fn like(mut self, column: impl Into<String>, needle: impl Into<String>) -> Self {
        self.like.push((column.into(), needle.into()));
        self
    }

    pub fn like_or(mut self, column: impl Into<String>, needle: impl Into<String>) -> Self {
        self.like_or.push((column.into(), needle.into()));
        self
    }

    pub fn union(mut self, other: Filter) -> Self {
        self.union = Some(Box::new(other));
        self
    }

    pub fn union_all(mut self, other: Filter) -> Self {
        self.union_all = Some(Box::new(other));
        self
    }

    pub fn intersect(mut self, other: Filter) -> Self {
        self.intersect = Some(Box::new(other));
        self
    }

    pub fn except(mut self, other: Filter) -> Self {
        self.except = Some(Box::new(other));
        self
    }

    pub fn group_by(mut self, column: impl Into<String>) -> Self {
        self.group_by.push(column.into());
        self
    }

    /// Add an ORDER BY term, e.g. `"year DESC"`.
    pub fn order_by(mut self, term: impl Into<String>) -> Self {
        self.order_by.push(term.into());
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Whether the filter carries clauses that only make sense on SELECT.
    pub fn is_select_only(&self) -> bool {
        !self.select.is_empty()
            || self.union.is_some()
            || self.union_all.is_some()
            || self.intersect.is_some()
            || self.except.is_some()
            || !self.group_by.is_empty()
            || !self.order_by.is_empty()
            || self.limit.is_some()
    }

    /// Translate the external JSON representation.
    pub fn from_json(value: &Value) -> Result<Self> {
        let map = value
            .as_object()
            .ok_or_else(|| CoreError::InvalidFilter("filter must be an object".into()))?;

        let mut filter = Filter::new();
        for (key, v) in map {
            match key.as_str() {
                "from" => filter.from = Some(string_of(key, v)?),
                "select" => filter.select = strings_of(key, v)?,
                "where" => filter.where_ = conditions_of(v)?,
                "whereNot" => filter.where_not = conditions_of(v)?,
                "like" => filter.like = patterns_of(key, v)?,
                "likeor" | "likeOr" => filter.like_or = patterns_of(key, v)?,
                "union" => filter.union = Some(Box::new(Filter::from_json(v)?)),
                "unionAll" => filter.union_all = Some(Box::new(Filter::from_json(v)?)),
                "intersect" => filter.intersect = Some(Box::new(Filter::from_json(v)?)),
                "except" => filter.except = Some(Box::new(Filter::from_json(v)?)),
                "groupBy" => filter.group_by = strings_of(key, v)?,
                "orderBy" => filter.order_by = strings_of(key, v)?,
                "limit" => filter.limit = number_of(key, v)?,
                "offset" => filter.offset = number_of(key, v)?,
                other => {
                    return Err(CoreError::InvalidFilter(format!("unknown key {:?}", other)))
                }
            }
        }
        Ok(filter)
    }
}

fn string_of(key: &str, v: &Value) -> Result<String> {
    v.as_str()
        .map(String::from)
        .ok_or_else(|| CoreError::InvalidFilter(format!("{} must be a string", key)))
}

/// A string, or a list of strings.
fn strings_of(key: &str, v: &Value) -> Result<Vec<String>> {
    match v {
        Value::String(s) => Ok(vec![s.clone()]),
        Value::Array(items) => items.iter().map(|item| string_of(key, item)).collect(),
        _ => Err(CoreError::InvalidFilter(format!(
            "{} must be a string or a list of strings",
            key
        ))),
    }
}

fn number_of(key: &str, v: &Value) -> Result<Option<u64>> {
    match v {
        Value::Null => Ok(None),
        Value::Number(n) => n
            .as_u64()
            .map(Some)
            .ok_or_else(|| CoreError::InvalidFilter(format!("{} must be non-negative", key))),
        Value::String(s) => s
            .parse()
            .map(Some)
            .map_err(|_| CoreError::InvalidFilter(format!("{} must be a number", key))),
        _ => Err(CoreError::InvalidFilter(format!("{} must be a number", key))),
    }
}

fn patterns_of(key: &str, v: &Value) -> Result<Vec<(String, String)>> {
    let map = v
        .as_object()
        .ok_or_else(|| CoreError::InvalidFilter(format!("{} must be an object", key)))?;
    map.iter()
        .map(|(column, needle)| {
            let needle = match needle {
                Value::String(s) => s.clone(),
                Value::Number(_) | Value::Bool(_) => needle.to_string(),
                _ => {
                    return Err(CoreError::InvalidFilter(format!(
                        "{}.{} must be a scalar",
                        key, column
                    )))
                }
            };
            Ok((column.clone(), needle))
        })
        .collect()
}

/// Expand a conditions map.
///
/// Lists become `OneOf`, nested maps are expanded recursively and ANDed in,
/// and the reserved key `$or` takes a list of maps that are ORed together.
fn conditions_of(v: &Value) -> Result<Option<Expr>> {
    let map = match v {
        Value::Null => return Ok(None),
        Value::Object(map) => map,
        _ => {
            return Err(CoreError::InvalidFilter(
                "conditions must be an object".into(),
            ))
        }
    };

    let mut parts = Vec::with_capacity(map.len());
    for (column, value) in map {
        match value {
            Value::Object(_) => {
                if let Some(nested) = conditions_of(value)? {
                    parts.push(nested);
                }
            }
            Value::Array(items) if column == "$or" => {
                let branches = items
                    .iter()
                    .map(conditions_of)
                    .collect::<Result<Vec<_>>>()?
                    .into_iter()
                    .flatten()
                    .collect::<Vec<_>>();
                if !branches.is_empty() {
                    parts.push(Expr::Or(branches));
                }
            }
            Value::Array(items) => {
                let values = items
                    .iter()
                    .map(|item| match item {
                        Value::Array(_) | Value::Object(_) => Err(CoreError::InvalidFilter(
                            format!("{} list values must be scalars", column),
                        )),
                        scalar => Ok(SqlValue::from_json(scalar)),
                    })
                    .collect::<Result<Vec<_>>>()?;
                parts.push(Expr::OneOf(column.clone(), values));
            }
            scalar => parts.push(Expr::Eq(column.clone(), SqlValue::from_json(scalar))),
        }
    }

    Ok(match parts.len() {
        0 => None,
        1 => parts.pop(),
        _ => Some(Expr::And(parts)),
    })
}
