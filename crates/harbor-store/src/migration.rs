//! Per-entity schema migrations for SQLite.
//!
//! Each entity's applied version is recorded as one row of the tracking
//! table `harbor_migrations(latest TEXT, model TEXT)`. A run computes the
//! steps between the recorded and the target version with
//! [`harbor_core::plan`], executes them through a [`MigrationContext`] bound
//! to a single transaction, then rewrites the tracking row and commits.
//! Any failing statement rolls the whole run back.

use harbor_core::query::{build, ident};
use harbor_core::{
    generate_identity, plan, ColumnDef, Direction, EntityDescriptor, Filter, Record, SchemaError,
    SchemaOps, Statement,
};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{Result, StoreError};
use crate::sql::{bind_all, insert_statement};

/// Name of the tracking table.
pub const TRACKING_TABLE: &str = "harbor_migrations";

/// Where an entity's schema stands relative to its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaState {
    /// No version has been recorded yet.
    Uninitialized,
    /// A run would move the schema from `from` to `to`.
    Pending { from: u64, to: u64 },
    /// The recorded version is the target.
    Current(u64),
    /// The entity requests no migrations; only the base table is ensured.
    Unversioned,
}

/// What a migration run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Version recorded before the run.
    pub from: Option<u64>,
    /// Version recorded after the run. `None` for unversioned entities.
    pub to: Option<u64>,
    pub direction: Option<Direction>,
    /// Identifiers of the steps executed, in execution order.
    pub steps: Vec<u64>,
    /// Schema statements issued by the steps (tracking writes excluded).
    pub statements: usize,
}

impl MigrationReport {
    /// Whether the run touched the schema at all.
    pub fn is_noop(&self) -> bool {
        self.statements == 0
    }
}

fn ensure_tracking_table(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS harbor_migrations (latest TEXT, model TEXT)",
        [],
    )?;
    Ok(())
}

/// Read the recorded version for `table`.
pub fn recorded_version(conn: &Connection, table: &str) -> Result<Option<u64>> {
    ensure_tracking_table(conn)?;
    let latest: Option<Option<String>> = conn
        .query_row(
            "SELECT latest FROM harbor_migrations WHERE model = ?1",
            params![table],
            |row| row.get(0),
        )
        .optional()?;

    match latest.flatten() {
        None => Ok(None),
        Some(text) => text.trim().parse::<u64>().map(Some).map_err(|_| {
            StoreError::InvalidData(format!(
                "unreadable migration version {:?} for {}",
                text, table
            ))
        }),
    }
}

/// Report where `entity` stands without changing anything.
pub fn schema_state(conn: &Connection, entity: &EntityDescriptor) -> Result<SchemaState> {
    let target = match entity.target_version() {
        Some(target) => target,
        None => return Ok(SchemaState::Unversioned),
    };
    Ok(match recorded_version(conn, entity.table())? {
        None => SchemaState::Uninitialized,
        Some(current) if current == target => SchemaState::Current(current),
        Some(from) => SchemaState::Pending { from, to: target },
    })
}

/// Initialize or migrate the entity's table.
///
/// This function is idempotent: running it twice at the same target issues
/// no schema statements the second time.
pub fn migrate(conn: &mut Connection, entity: &EntityDescriptor) -> Result<MigrationReport> {
    let table = entity.table();

    let target = match entity.target_version() {
        Some(target) => target,
        None => {
            let mut ctx = MigrationContext::new(conn, entity);
            ctx.create_table(entity.columns())?;
            debug!(table, "ensured base table");
            return Ok(MigrationReport {
                statements: ctx.statements,
                ..MigrationReport::default()
            });
        }
    };

    let current = recorded_version(conn, table)?;
    if current == Some(target) {
        debug!(table, version = target, "schema current");
        return Ok(MigrationReport {
            from: current,
            to: current,
            ..MigrationReport::default()
        });
    }

    let (direction, steps) = plan(entity.migrations(), current, target);
    let step_ids: Vec<u64> = steps.iter().map(|m| m.id()).collect();

    let tx = conn.transaction()?;
    let statements = {
        let mut ctx = MigrationContext::new(&tx, entity);
        if entity.migrations().is_empty() {
            ctx.create_table(entity.columns())?;
        }
        for step in &steps {
            debug!(table, step = step.id(), ?direction, "running migration step");
            step.run(&mut ctx, direction)?;
        }
        ctx.statements
    };

    tx.execute(
        "DELETE FROM harbor_migrations WHERE model = ?1",
        params![table],
    )?;
    tx.execute(
        "INSERT INTO harbor_migrations (latest, model) VALUES (?1, ?2)",
        params![target.to_string(), table],
    )?;
    tx.commit()?;

    info!(
        table,
        from = ?current,
        to = target,
        ?direction,
        steps = step_ids.len(),
        "migrated"
    );

    Ok(MigrationReport {
        from: current,
        to: Some(target),
        direction: Some(direction),
        steps: step_ids,
        statements,
    })
}

/// The schema surface handed to migration steps.
///
/// Borrows the run's connection (a transaction during versioned runs) and
/// counts every statement it issues.
pub struct MigrationContext<'a> {
    conn: &'a Connection,
    entity: &'a EntityDescriptor,
    statements: usize,
}

impl<'a> MigrationContext<'a> {
    pub fn new(conn: &'a Connection, entity: &'a EntityDescriptor) -> Self {
        Self {
            conn,
            entity,
            statements: 0,
        }
    }

    pub fn statements(&self) -> usize {
        self.statements
    }

    fn execute(
        &mut self,
        sql: &str,
        params: &[harbor_core::SqlValue],
    ) -> std::result::Result<(), SchemaError> {
        debug!(table = self.entity.table(), sql, "schema statement");
        self.conn
            .execute(sql, rusqlite::params_from_iter(bind_all(params)))
            .map_err(|e| SchemaError::Statement(format!("{}: {}", sql, e)))?;
        self.statements += 1;
        Ok(())
    }
}

impl SchemaOps for MigrationContext<'_> {
    fn table(&self) -> &str {
        self.entity.table()
    }

    fn id_attribute(&self) -> &str {
        self.entity.id_attribute()
    }

    fn create_table(&mut self, columns: &[ColumnDef]) -> std::result::Result<(), SchemaError> {
        let id_attribute = self.entity.id_attribute();
        let mut defs = Vec::with_capacity(columns.len() + 1);
        for column in columns {
            ident(&column.name)?;
            if column.aliased {
                warn!(
                    table = self.entity.table(),
                    column = %column.name,
                    stored_as = column.column_type.as_sql(),
                    "column type is not a SQLite storage class"
                );
            }
            defs.push(column.definition());
        }
        if self.entity.uses_generated_identity() && !columns.iter().any(|c| c.name == id_attribute)
        {
            defs.push(ColumnDef::new(id_attribute, "TEXT").definition());
        }
        if defs.is_empty() {
            return Err(SchemaError::Invalid(format!(
                "table {} has no columns",
                self.entity.table()
            )));
        }

        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            ident(self.entity.table())?,
            defs.join(", ")
        );
        self.execute(&sql, &[])
    }

    fn drop_table(&mut self) -> std::result::Result<(), SchemaError> {
        let sql = format!("DROP TABLE IF EXISTS {}", ident(self.entity.table())?);
        self.execute(&sql, &[])
    }

    fn create_index(
        &mut self,
        name: &str,
        columns: &[&str],
        unique: bool,
    ) -> std::result::Result<(), SchemaError> {
        if columns.is_empty() {
            return Err(SchemaError::Invalid(format!("index {} has no columns", name)));
        }
        let columns = columns
            .iter()
            .map(|c| ident(c))
            .collect::<harbor_core::Result<Vec<_>>>()?;
        let sql = format!(
            "CREATE {}INDEX IF NOT EXISTS {} ON {} ({})",
            if unique { "UNIQUE " } else { "" },
            ident(name)?,
            ident(self.entity.table())?,
            columns.join(", ")
        );
        self.execute(&sql, &[])
    }

    fn drop_index(&mut self, name: &str) -> std::result::Result<(), SchemaError> {
        let sql = format!("DROP INDEX IF EXISTS {}", ident(name)?);
        self.execute(&sql, &[])
    }

    fn insert_row(&mut self, row: &Record) -> std::result::Result<(), SchemaError> {
        let mut row = row.clone();
        let id_attribute = self.entity.id_attribute();
        if self.entity.uses_generated_identity()
            && row.get(id_attribute).map_or(true, Value::is_null)
        {
            row.insert(id_attribute.to_string(), Value::String(generate_identity()));
        }
        let (sql, params) = insert_statement(self.entity.table(), &row)
            .map_err(|e| SchemaError::Invalid(e.to_string()))?;
        self.execute(&sql, &params)
    }

    fn delete_row(&mut self, matching: &Record) -> std::result::Result<(), SchemaError> {
        let filter = matching
            .iter()
            .fold(Filter::new(), |f, (column, value)| {
                f.where_eq(column.as_str(), value)
            });
        let query = build(self.entity.table(), &filter, Statement::Delete)?;
        self.execute(&query.sql, &query.params)
    }
}
