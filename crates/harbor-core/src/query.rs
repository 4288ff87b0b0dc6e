//! SQL query builder.
//!
//! Turns a [`Filter`] into SQL text plus bound parameters. Values never
//! appear in the text: every comparison and LIKE pattern is a `?`
//! placeholder. Identifiers cannot be bound, so they are validated instead.
//!
//! Clause order is fixed:
//!
//! ```text
//! SELECT <cols|*> FROM <table>
//!   WHERE <where | 1=1>
//!   [AND <where_not>] [AND <like...>] [AND (<like_or...>)]
//!   [UNION <f>] [UNION ALL <f>] [INTERSECT <f>] [EXCEPT <f>]
//!   [GROUP BY ..] [ORDER BY ..] [LIMIT n [OFFSET m]]
//! ```
//!
//! The WHERE clause is never omitted so that every later clause can be
//! appended with a plain `AND`.

use crate::error::{CoreError, Result};
use crate::filter::{Expr, Filter};
use crate::value::SqlValue;

/// The always-true predicate used when a filter has no conditions.
pub const TAUTOLOGY: &str = "1=1";

/// The always-false predicate (an empty `OneOf` / `Or`).
const CONTRADICTION: &str = "0=1";

/// Statement keyword the WHERE logic is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Statement {
    #[default]
    Select,
    Delete,
}

/// SQL text with its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

/// Caller-supplied SQL, executed as-is with bound parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct RawQuery {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl RawQuery {
    pub fn new(sql: impl Into<String>, params: Vec<SqlValue>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

impl From<RawQuery> for Query {
    fn from(raw: RawQuery) -> Self {
        Query {
            sql: raw.sql,
            params: raw.params,
        }
    }
}

/// Build a statement over `table`.
///
/// `filter.from` overrides `table` when set.
pub fn build(table: &str, filter: &Filter, statement: Statement) -> Result<Query> {
    let table = filter.from.as_deref().unwrap_or(table);
    let mut out = Emitter::default();

    match statement {
        Statement::Select => out.select_core(table, filter)?,
        Statement::Delete => {
            if filter.is_select_only() {
                return Err(CoreError::InvalidFilter(
                    "DELETE accepts conditions and patterns only".into(),
                ));
            }
            out.sql.push_str("DELETE FROM ");
            out.sql.push_str(ident(table)?);
            out.conditions(filter)?;
        }
    }

    out.compounds(table, filter)?;

    if !filter.group_by.is_empty() {
        out.sql.push_str(" GROUP BY ");
        out.sql.push_str(&idents(&filter.group_by)?.join(", "));
    }

    if !filter.order_by.is_empty() {
        let terms = filter
            .order_by
            .iter()
            .map(|t| order_term(t))
            .collect::<Result<Vec<_>>>()?;
        out.sql.push_str(" ORDER BY ");
        out.sql.push_str(&terms.join(", "));
    }

    if let Some(limit) = filter.limit {
        out.sql.push_str(&format!(" LIMIT {}", limit));
        if let Some(offset) = filter.offset {
            out.sql.push_str(&format!(" OFFSET {}", offset));
        }
    }

    Ok(Query {
        sql: out.sql,
        params: out.params,
    })
}

/// Shorthand for a SELECT.
pub fn select(table: &str, filter: &Filter) -> Result<Query> {
    build(table, filter, Statement::Select)
}

/// Point lookup of one row by identity.
pub fn point_lookup(table: &str, id_attribute: &str, id: SqlValue) -> Result<Query> {
    build(table, &Filter::new().where_eq(id_attribute, id), Statement::Select)
}

#[derive(Default)]
struct Emitter {
    sql: String,
    params: Vec<SqlValue>,
}

impl Emitter {
    fn select_core(&mut self, table: &str, filter: &Filter) -> Result<()> {
        self.sql.push_str("SELECT ");
        if filter.select.is_empty() {
            self.sql.push('*');
        } else {
            let cols = filter
                .select
                .iter()
                .map(|c| if c == "*" { Ok(c.as_str()) } else { ident(c) })
                .collect::<Result<Vec<_>>>()?;
            self.sql.push_str(&cols.join(", "));
        }
        self.sql.push_str(" FROM ");
        self.sql.push_str(ident(table)?);
        self.conditions(filter)
    }

    fn conditions(&mut self, filter: &Filter) -> Result<()> {
        self.sql.push_str(" WHERE ");
        match &filter.where_ {
            Some(expr) => self.top_level(expr, "=")?,
            None => self.sql.push_str(TAUTOLOGY),
        }

        if let Some(expr) = &filter.where_not {
            self.sql.push_str(" AND ");
            self.top_level(expr, "!=")?;
        }

        for (column, needle) in &filter.like {
            self.sql.push_str(" AND ");
            self.like(column, needle)?;
        }

        if !filter.like_or.is_empty() {
            self.sql.push_str(" AND (");
            for (i, (column, needle)) in filter.like_or.iter().enumerate() {
                if i > 0 {
                    self.sql.push_str(" OR ");
                }
                self.like(column, needle)?;
            }
            self.sql.push(')');
        }
        Ok(())
    }

    /// Set combinations apply left to right, so their order is fixed.
    fn compounds(&mut self, table: &str, filter: &Filter) -> Result<()> {
        let parts = [
            (" UNION ", &filter.union),
            (" UNION ALL ", &filter.union_all),
            (" INTERSECT ", &filter.intersect),
            (" EXCEPT ", &filter.except),
        ];
        for (keyword, nested) in parts {
            if let Some(nested) = nested {
                let nested_table = nested.from.as_deref().unwrap_or(table);
                self.sql.push_str(keyword);
                self.select_core(nested_table, nested)?;
                self.compounds(nested_table, nested)?;
            }
        }
        Ok(())
    }

    /// A top-level AND is emitted without surrounding parentheses.
    fn top_level(&mut self, expr: &Expr, op: &str) -> Result<()> {
        match expr {
            Expr::And(items) if !items.is_empty() => self.joined(items, " AND ", op),
            other => self.expr(other, op),
        }
    }

    fn expr(&mut self, expr: &Expr, op: &str) -> Result<()> {
        match expr {
            Expr::Eq(column, value) => self.comparison(column, value, op),
            Expr::OneOf(column, values) => {
                if values.is_empty() {
                    self.sql
                        .push_str(if op == "=" { CONTRADICTION } else { TAUTOLOGY });
                    return Ok(());
                }
                self.sql.push('(');
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        self.sql.push_str(" OR ");
                    }
                    self.comparison(column, value, op)?;
                }
                self.sql.push(')');
                Ok(())
            }
            Expr::And(items) => match items.len() {
                0 => {
                    self.sql.push_str(TAUTOLOGY);
                    Ok(())
                }
                1 => self.expr(&items[0], op),
                _ => {
                    self.sql.push('(');
                    self.joined(items, " AND ", op)?;
                    self.sql.push(')');
                    Ok(())
                }
            },
            Expr::Or(items) => match items.len() {
                0 => {
                    self.sql.push_str(CONTRADICTION);
                    Ok(())
                }
                1 => self.expr(&items[0], op),
                _ => {
                    self.sql.push('(');
                    self.joined(items, " OR ", op)?;
                    self.sql.push(')');
                    Ok(())
                }
            },
        }
    }

    fn joined(&mut self, items: &[Expr], sep: &str, op: &str) -> Result<()> {
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                self.sql.push_str(sep);
            }
            self.expr(item, op)?;
        }
        Ok(())
    }

    fn comparison(&mut self, column: &str, value: &SqlValue, op: &str) -> Result<()> {
        let column = ident(column)?;
        // `= NULL` never matches in SQL
        if value.is_null() {
            let test = if op == "=" { "IS NULL" } else { "IS NOT NULL" };
            self.sql.push_str(&format!("{} {}", column, test));
        } else {
            self.sql.push_str(&format!("{} {} ?", column, op));
            self.params.push(value.clone());
        }
        Ok(())
    }

    fn like(&mut self, column: &str, needle: &str) -> Result<()> {
        self.sql.push_str(&format!("{} LIKE ?", ident(column)?));
        self.params.push(SqlValue::Text(format!("%{}%", needle)));
        Ok(())
    }
}

/// Whether `s` can be inlined as a table or column name.
///
/// Accepts `[A-Za-z_][A-Za-z0-9_]*`, optionally dotted (`wine.name`).
pub fn is_identifier(s: &str) -> bool {
    !s.is_empty()
        && s.split('.').all(|segment| {
            let mut chars = segment.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

/// Validate an identifier, returning it unchanged.
pub fn ident(s: &str) -> Result<&str> {
    if is_identifier(s) {
        Ok(s)
    } else {
        Err(CoreError::InvalidIdentifier(s.to_string()))
    }
}

fn idents(items: &[String]) -> Result<Vec<&str>> {
    items.iter().map(|s| ident(s)).collect()
}

/// `column` or `column ASC|DESC`.
fn order_term(term: &str) -> Result<String> {
    let mut parts = term.split_whitespace();
    let column = parts
        .next()
        .ok_or_else(|| CoreError::InvalidIdentifier(term.to_string()))?;
    let column = ident(column)?;
    match (parts.next(), parts.next()) {
        (None, _) => Ok(column.to_string()),
        (Some(dir), None) if dir.eq_ignore_ascii_case("asc") => Ok(format!("{} ASC", column)),
        (Some(dir), None) if dir.eq_ignore_ascii_case("desc") => Ok(format!("{} DESC", column)),
        _ => Err(CoreError::InvalidIdentifier(term.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_filter_has_tautology() {
        let q = select("wine", &Filter::new()).unwrap();
        assert_eq!(q.sql, "SELECT * FROM wine WHERE 1=1");
        assert!(q.params.is_empty());
    }

    #[test]
    fn test_projection() {
        let q = select("wine", &Filter::new().select(["name", "year"])).unwrap();
        assert_eq!(q.sql, "SELECT name, year FROM wine WHERE 1=1");
    }

    #[test]
    fn test_scalar_values_are_bound() {
        let f = Filter::from_json(&json!({
            "where": { "name": "O'Brien", "organic": true, "year": 2012 }
        }))
        .unwrap();
        let q = select("wine", &f).unwrap();

        assert_eq!(
            q.sql,
            "SELECT * FROM wine WHERE name = ? AND organic = ? AND year = ?"
        );
        assert_eq!(
            q.params,
            vec![
                SqlValue::Text("O'Brien".into()),
                SqlValue::Integer(1),
                SqlValue::Integer(2012),
            ]
        );
    }

    #[test]
    fn test_list_values_or_within_and() {
        let f = Filter::new()
            .where_eq("year", 2012)
            .where_one_of("country", ["France", "Italy"]);
        let q = select("wine", &f).unwrap();
        assert_eq!(
            q.sql,
            "SELECT * FROM wine WHERE year = ? AND (country = ? OR country = ?)"
        );
        assert_eq!(q.params.len(), 3);
    }

    #[test]
    fn test_nested_map_recurses() {
        let f = Filter::from_json(&json!({
            "where": { "a": 1, "grp": { "b": 2, "c": [3, 4] } }
        }))
        .unwrap();
        let q = select("t", &f).unwrap();
        assert_eq!(
            q.sql,
            "SELECT * FROM t WHERE a = ? AND (b = ? AND (c = ? OR c = ?))"
        );
    }

    #[test]
    fn test_where_not_appended() {
        let f = Filter::new()
            .where_eq("country", "France")
            .where_not(Expr::eq("region", "Bordeaux"));
        let q = select("wine", &f).unwrap();
        assert_eq!(
            q.sql,
            "SELECT * FROM wine WHERE country = ? AND region != ?"
        );

        let only_not = Filter::new().where_not(Expr::eq("region", "Bordeaux"));
        let q = select("wine", &only_not).unwrap();
        assert_eq!(q.sql, "SELECT * FROM wine WHERE 1=1 AND region != ?");
    }

    #[test]
    fn test_null_uses_is_null() {
        let q = select("wine", &Filter::new().where_eq("region", SqlValue::Null)).unwrap();
        assert_eq!(q.sql, "SELECT * FROM wine WHERE region IS NULL");
        assert!(q.params.is_empty());
    }

    #[test]
    fn test_like_groups() {
        let f = Filter::new()
            .like("name", "CHATEAU")
            .like_or("region", "Bor")
            .like_or("country", "Fra");
        let q = select("wine", &f).unwrap();
        assert_eq!(
            q.sql,
            "SELECT * FROM wine WHERE 1=1 AND name LIKE ? AND (region LIKE ? OR country LIKE ?)"
        );
        assert_eq!(
            q.params,
            vec![
                SqlValue::Text("%CHATEAU%".into()),
                SqlValue::Text("%Bor%".into()),
                SqlValue::Text("%Fra%".into()),
            ]
        );
    }

    #[test]
    fn test_limit_and_offset() {
        let q = select("wine", &Filter::new().limit(5)).unwrap();
        assert_eq!(q.sql, "SELECT * FROM wine WHERE 1=1 LIMIT 5");

        let q = select("wine", &Filter::new().limit(5).offset(2)).unwrap();
        assert_eq!(q.sql, "SELECT * FROM wine WHERE 1=1 LIMIT 5 OFFSET 2");

        let q = select("wine", &Filter::new().offset(2)).unwrap();
        assert_eq!(q.sql, "SELECT * FROM wine WHERE 1=1");
    }

    #[test]
    fn test_set_combinations_in_fixed_order() {
        let f = Filter::new()
            .where_eq("year", 2012)
            .except(Filter::new().where_eq("country", "France"))
            .union(Filter::new().where_eq("year", 2011))
            .order_by("name DESC");
        let q = select("wine", &f).unwrap();
        assert_eq!(
            q.sql,
            "SELECT * FROM wine WHERE year = ? \
             UNION SELECT * FROM wine WHERE year = ? \
             EXCEPT SELECT * FROM wine WHERE country = ? \
             ORDER BY name DESC"
        );
        assert_eq!(
            q.params,
            vec![
                SqlValue::Integer(2012),
                SqlValue::Integer(2011),
                SqlValue::Text("France".into()),
            ]
        );
    }

    #[test]
    fn test_nested_filter_table_override() {
        let f = Filter::new()
            .select(["name"])
            .intersect(Filter::new().select(["name"]).from_table("favourites"));
        let q = select("wine", &f).unwrap();
        assert_eq!(
            q.sql,
            "SELECT name FROM wine WHERE 1=1 INTERSECT SELECT name FROM favourites WHERE 1=1"
        );
    }

    #[test]
    fn test_group_by_before_order_by() {
        let f = Filter::new()
            .select(["country"])
            .group_by("country")
            .order_by("country")
            .limit(3);
        let q = select("wine", &f).unwrap();
        assert_eq!(
            q.sql,
            "SELECT country FROM wine WHERE 1=1 GROUP BY country ORDER BY country LIMIT 3"
        );
    }

    #[test]
    fn test_delete_statement() {
        let q = build("wine", &Filter::new().where_eq("id", 7), Statement::Delete).unwrap();
        assert_eq!(q.sql, "DELETE FROM wine WHERE id = ?");

        let q = build("wine", &Filter::new(), Statement::Delete).unwrap();
        assert_eq!(q.sql, "DELETE FROM wine WHERE 1=1");

        assert!(build("wine", &Filter::new().limit(1), Statement::Delete).is_err());
    }

    #[test]
    fn test_identifiers_validated() {
        let f = Filter::new().where_eq("name = 1 OR 1", 1);
        assert!(matches!(
            select("wine", &f),
            Err(CoreError::InvalidIdentifier(_))
        ));
        assert!(select("wine;", &Filter::new()).is_err());
        assert!(select("wine", &Filter::new().order_by("name; DROP")).is_err());
        assert!(select("wine", &Filter::new().order_by("name sideways")).is_err());
        assert!(is_identifier("wine.name"));
        assert!(!is_identifier("1wine"));
    }

    #[test]
    fn test_empty_one_of_matches_nothing() {
        let f = Filter::new().where_expr(Expr::OneOf("id".into(), vec![]));
        let q = select("wine", &f).unwrap();
        assert_eq!(q.sql, "SELECT * FROM wine WHERE 0=1");
    }

    proptest::proptest! {
        #[test]
        fn prop_placeholders_match_params(
            values in proptest::collection::vec(proptest::prelude::any::<i64>(), 0..8),
            needles in proptest::collection::vec("[a-z%_']{0,6}", 0..4),
        ) {
            let mut f = Filter::new().where_one_of("year", values.clone());
            for n in &needles {
                f = f.like("name", n.clone());
            }
            let q = select("wine", &f).unwrap();
            proptest::prop_assert_eq!(q.sql.matches('?').count(), q.params.len());
            proptest::prop_assert_eq!(q.params.len(), values.len() + needles.len());
        }
    }

    #[test]
    fn test_point_lookup() {
        let q = point_lookup("wine", "id", SqlValue::Integer(3)).unwrap();
        assert_eq!(q.sql, "SELECT * FROM wine WHERE id = ?");
        assert_eq!(q.params, vec![SqlValue::Integer(3)]);
    }
}
