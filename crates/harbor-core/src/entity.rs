//! Entity descriptors: static per-collection configuration.
//!
//! A descriptor names the local table, its declared columns, the identity
//! column, the optional tombstone and last-modified columns, the remote
//! endpoint and the migration sequence. Descriptors are built once at
//! startup and never change afterwards.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::error::{CoreError, Result};
use crate::migration::Migration;
use crate::query::is_identifier;

/// Identity column added when an entity declares none.
pub const DEFAULT_ID_ATTRIBUTE: &str = "harbor_id";

/// Field that marks an incoming record as deleted on the server.
pub const DEFAULT_DELETED_MARKER: &str = "is_deleted";

/// Format used for last-modified stamps when none is configured.
pub const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// SQLite column type after normalisation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Text,
    Integer,
    Real,
    Blob,
    Null,
}

impl ColumnType {
    /// Normalise a free-text type hint.
    ///
    /// Returns the column type and whether the hint was a non-SQLite alias
    /// (e.g. `varchar`, `boolean`) that callers may want to warn about.
    /// Unrecognised hints fall back to `TEXT` silently.
    pub fn from_hint(hint: &str) -> (Self, bool) {
        match hint.to_ascii_lowercase().as_str() {
            "text" => (ColumnType::Text, false),
            "string" | "varchar" | "date" | "datetime" => (ColumnType::Text, true),
            "integer" => (ColumnType::Integer, false),
            "int" | "tinyint" | "smallint" | "bigint" | "boolean" => (ColumnType::Integer, true),
            "real" => (ColumnType::Real, false),
            "double" | "float" | "decimal" | "number" => (ColumnType::Real, true),
            "blob" => (ColumnType::Blob, false),
            "null" => (ColumnType::Null, false),
            _ => (ColumnType::Text, false),
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            ColumnType::Text => "TEXT",
            ColumnType::Integer => "INTEGER",
            ColumnType::Real => "REAL",
            ColumnType::Blob => "BLOB",
            ColumnType::Null => "NULL",
        }
    }
}

/// A declared column.
///
/// The first word of the hint is the type; the remaining words (`PRIMARY KEY
/// AUTOINCREMENT`, `NOT NULL`, ...) are kept verbatim as constraints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub column_type: ColumnType,
    pub constraints: Option<String>,
    /// The hint used a non-SQLite alias.
    pub aliased: bool,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, hint: &str) -> Self {
        let mut parts = hint.split_whitespace();
        let (column_type, aliased) = parts
            .next()
            .map(ColumnType::from_hint)
            .unwrap_or((ColumnType::Text, false));
        let rest: Vec<&str> = parts.collect();
        Self {
            name: name.into(),
            column_type,
            constraints: if rest.is_empty() {
                None
            } else {
                Some(rest.join(" "))
            },
            aliased,
        }
    }

    /// The column fragment of a `CREATE TABLE` statement.
    pub fn definition(&self) -> String {
        match &self.constraints {
            Some(c) => format!("{} {} {}", self.name, self.column_type.as_sql(), c),
            None => format!("{} {}", self.name, self.column_type.as_sql()),
        }
    }
}

/// Where the remote collection lives.
#[derive(Clone)]
pub enum UrlSource {
    Static(String),
    /// Evaluated on every sync call. Returning `None` means "no base URL".
    Computed(Arc<dyn Fn() -> Option<String> + Send + Sync>),
}

impl UrlSource {
    pub fn resolve(&self) -> Option<String> {
        match self {
            UrlSource::Static(url) if url.is_empty() => None,
            UrlSource::Static(url) => Some(url.clone()),
            UrlSource::Computed(f) => f().filter(|url| !url.is_empty()),
        }
    }
}

impl fmt::Debug for UrlSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UrlSource::Static(url) => f.debug_tuple("Static").field(url).finish(),
            UrlSource::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

/// A column that is stamped with the current time on every local write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastModified {
    pub column: String,
    /// chrono `strftime` format.
    pub format: String,
}

/// Static configuration for one synchronised collection.
#[derive(Debug, Clone)]
pub struct EntityDescriptor {
    name: String,
    table: String,
    columns: Vec<ColumnDef>,
    id_attribute: String,
    deleted_marker: Option<String>,
    last_modified: Option<LastModified>,
    base_url: Option<UrlSource>,
    headers: Vec<(String, String)>,
    url_params: Vec<(String, String)>,
    migrations: Vec<Migration>,
    target_version: Option<u64>,
    strict: bool,
    save_on_error: Option<bool>,
}

impl EntityDescriptor {
    /// Start describing an entity. The table name defaults to `name`.
    pub fn builder(name: impl Into<String>) -> EntityBuilder {
        EntityBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn id_attribute(&self) -> &str {
        &self.id_attribute
    }

    /// Whether identities are generated locally rather than by the store.
    pub fn uses_generated_identity(&self) -> bool {
        self.id_attribute == DEFAULT_ID_ATTRIBUTE
    }

    pub fn deleted_marker(&self) -> Option<&str> {
        self.deleted_marker.as_deref()
    }

    pub fn last_modified(&self) -> Option<&LastModified> {
        self.last_modified.as_ref()
    }

    /// Resolve the base URL for a call.
    pub fn base_url(&self) -> Option<String> {
        self.base_url.as_ref().and_then(UrlSource::resolve)
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn url_params(&self) -> &[(String, String)] {
        &self.url_params
    }

    /// Migration steps in ascending identifier order.
    pub fn migrations(&self) -> &[Migration] {
        &self.migrations
    }

    /// The schema version this release expects.
    ///
    /// The explicitly configured version wins; otherwise the last declared
    /// migration. `None` means no migrations are requested at all.
    pub fn target_version(&self) -> Option<u64> {
        self.target_version
            .or_else(|| self.migrations.last().map(Migration::id))
    }

    pub fn strict(&self) -> bool {
        self.strict
    }

    /// Entity-level default for persisting locally when the server errors.
    pub fn save_on_error(&self) -> Option<bool> {
        self.save_on_error
    }
}

/// Builder for [`EntityDescriptor`].
pub struct EntityBuilder {
    name: String,
    table: Option<String>,
    columns: Vec<ColumnDef>,
    id_attribute: Option<String>,
    deleted_marker: Option<String>,
    last_modified: Option<LastModified>,
    base_url: Option<UrlSource>,
    headers: Vec<(String, String)>,
    url_params: Vec<(String, String)>,
    migrations: Vec<Migration>,
    target_version: Option<u64>,
    strict: bool,
    save_on_error: Option<bool>,
}

impl EntityBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: None,
            columns: Vec::new(),
            id_attribute: None,
            deleted_marker: Some(DEFAULT_DELETED_MARKER.to_string()),
            last_modified: None,
            base_url: None,
            headers: Vec::new(),
            url_params: Vec::new(),
            migrations: Vec::new(),
            target_version: None,
            strict: false,
            save_on_error: None,
        }
    }

    /// Set the local table name.
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    /// Declare a column with a free-text type hint.
    pub fn column(mut self, name: impl Into<String>, hint: &str) -> Self {
        self.columns.push(ColumnDef::new(name, hint));
        self
    }

    /// Set the identity column.
    pub fn id_attribute(mut self, column: impl Into<String>) -> Self {
        self.id_attribute = Some(column.into());
        self
    }

    /// Set or disable (`None`) the tombstone marker field.
    pub fn deleted_marker(mut self, marker: Option<&str>) -> Self {
        self.deleted_marker = marker.map(String::from);
        self
    }

    /// Stamp `column` with the current time on every write.
    pub fn last_modified(self, column: impl Into<String>) -> Self {
        self.last_modified_with_format(column, DEFAULT_DATE_FORMAT)
    }

    pub fn last_modified_with_format(
        mut self,
        column: impl Into<String>,
        format: impl Into<String>,
    ) -> Self {
        self.last_modified = Some(LastModified {
            column: column.into(),
            format: format.into(),
        });
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(UrlSource::Static(url.into()));
        self
    }

    pub fn computed_url<F>(mut self, f: F) -> Self
    where
        F: Fn() -> Option<String> + Send + Sync + 'static,
    {
        self.base_url = Some(UrlSource::Computed(Arc::new(f)));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn url_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.url_params.push((name.into(), value.into()));
        self
    }

    pub fn migration(mut self, migration: Migration) -> Self {
        self.migrations.push(migration);
        self
    }

    /// Pin the schema version instead of following the last migration.
    pub fn target_version(mut self, version: u64) -> Self {
        self.target_version = Some(version);
        self
    }

    /// Reject inserts that lack any declared non-identity column.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn save_on_error(mut self, save: bool) -> Self {
        self.save_on_error = Some(save);
        self
    }

    pub fn build(self) -> Result<EntityDescriptor> {
        let table = self.table.unwrap_or_else(|| self.name.clone());
        if !is_identifier(&table) {
            return Err(CoreError::InvalidIdentifier(table));
        }

        let mut columns = self.columns;
        let mut seen = HashSet::new();
        for column in &columns {
            if !is_identifier(&column.name) {
                return Err(CoreError::InvalidIdentifier(column.name.clone()));
            }
            if !seen.insert(column.name.clone()) {
                return Err(CoreError::InvalidDescriptor(format!(
                    "column {} declared twice",
                    column.name
                )));
            }
        }

        let id_attribute = match self.id_attribute {
            Some(id) => {
                if !seen.contains(&id) && id != DEFAULT_ID_ATTRIBUTE {
                    return Err(CoreError::InvalidDescriptor(format!(
                        "id attribute {} not found in columns of {}",
                        id, table
                    )));
                }
                id
            }
            None => DEFAULT_ID_ATTRIBUTE.to_string(),
        };
        if id_attribute == DEFAULT_ID_ATTRIBUTE && !seen.contains(DEFAULT_ID_ATTRIBUTE) {
            columns.push(ColumnDef::new(DEFAULT_ID_ATTRIBUTE, "TEXT"));
        }

        if let Some(lm) = &self.last_modified {
            if !seen.contains(&lm.column) {
                return Err(CoreError::InvalidDescriptor(format!(
                    "last-modified column {} is not declared",
                    lm.column
                )));
            }
        }

        if self
            .migrations
            .windows(2)
            .any(|pair| pair[0].id() >= pair[1].id())
        {
            return Err(CoreError::InvalidDescriptor(
                "migration identifiers must be strictly ascending".into(),
            ));
        }

        Ok(EntityDescriptor {
            name: self.name,
            table,
            columns,
            id_attribute,
            deleted_marker: self.deleted_marker,
            last_modified: self.last_modified,
            base_url: self.base_url,
            headers: self.headers,
            url_params: self.url_params,
            migrations: self.migrations,
            target_version: self.target_version,
            strict: self.strict,
            save_on_error: self.save_on_error,
        })
    }
}
