//! SQLite implementation of the Store trait.
//!
//! This is the storage backend for harbor. It uses rusqlite with bundled
//! SQLite, wrapped in async via tokio::spawn_blocking.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use harbor_core::query::{self, ident, Statement};
use harbor_core::{EntityDescriptor, Filter, Identity, RawQuery, Record, SqlValue};
use rusqlite::Connection;
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::migration::{self, MigrationReport, SchemaState};
use crate::sql::{bind_all, collect_records, insert_statement, update_statement};
use crate::traits::{BatchOutcome, Store, WriteBatch, WriteOp};

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
#[derive(Clone)]
pub struct SqliteStore {
    /// The SQLite connection, protected by a mutex.
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Entity tables are created later, by [`Store::migrate`].
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        Ok(Self::from_connection(conn))
    }

    /// Open an in-memory SQLite database.
    ///
    /// Useful for testing.
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| StoreError::Unavailable(format!("mutex poisoned: {}", e)))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("blocking task failed: {}", e)))?
    }
}

fn select(conn: &Connection, sql: &str, params: &[SqlValue]) -> Result<Vec<Record>> {
    let mut stmt = conn.prepare(sql)?;
    collect_records(&mut stmt, params)
}

fn execute(conn: &Connection, sql: &str, params: &[SqlValue]) -> Result<usize> {
    Ok(conn.execute(sql, rusqlite::params_from_iter(bind_all(params)))?)
}

#[async_trait]
impl Store for SqliteStore {
    async fn migrate(&self, entity: &EntityDescriptor) -> Result<MigrationReport> {
        let entity = entity.clone();
        self.with_conn(move |conn| migration::migrate(conn, &entity))
            .await
    }

    async fn schema_state(&self, entity: &EntityDescriptor) -> Result<SchemaState> {
        let entity = entity.clone();
        self.with_conn(move |conn| migration::schema_state(conn, &entity))
            .await
    }

    async fn query(&self, table: &str, filter: &Filter) -> Result<Vec<Record>> {
        let query = query::select(table, filter)?;
        debug!(table, sql = %query.sql, "select");
        self.with_conn(move |conn| select(conn, &query.sql, &query.params))
            .await
    }

    async fn query_raw(&self, raw: &RawQuery) -> Result<Vec<Record>> {
        let raw = raw.clone();
        debug!(sql = %raw.sql, "raw select");
        self.with_conn(move |conn| select(conn, &raw.sql, &raw.params))
            .await
    }

    async fn identities(&self, table: &str, id_attribute: &str) -> Result<HashSet<Identity>> {
        let query = query::select(table, &Filter::new().select([id_attribute]))?;
        let id_attribute = id_attribute.to_string();
        self.with_conn(move |conn| {
            let rows = select(conn, &query.sql, &query.params)?;
            Ok(rows
                .iter()
                .filter_map(|row| row.get(&id_attribute).and_then(Identity::from_json))
                .collect())
        })
        .await
    }

    async fn find(
        &self,
        table: &str,
        id_attribute: &str,
        id: &SqlValue,
    ) -> Result<Option<Record>> {
        let query = query::point_lookup(table, id_attribute, id.clone())?;
        self.with_conn(move |conn| {
            let mut rows = select(conn, &query.sql, &query.params)?;
            Ok(if rows.len() == 1 { rows.pop() } else { None })
        })
        .await
    }

    async fn apply(&self, batch: WriteBatch) -> Result<BatchOutcome> {
        if batch.is_empty() {
            return Ok(BatchOutcome::default());
        }
        self.with_conn(move |conn| apply_batch(conn, &batch)).await
    }

    async fn delete_where(&self, table: &str, filter: &Filter) -> Result<usize> {
        let query = query::build(table, filter, Statement::Delete)?;
        debug!(table, sql = %query.sql, "delete");
        self.with_conn(move |conn| execute(conn, &query.sql, &query.params))
            .await
    }
}

/// Apply a batch inside one transaction. Nothing is visible until commit.
fn apply_batch(conn: &mut Connection, batch: &WriteBatch) -> Result<BatchOutcome> {
    let table = ident(&batch.table)?;
    let id_attribute = ident(&batch.id_attribute)?;

    let tx = conn.transaction()?;
    let mut outcome = BatchOutcome {
        ids: Vec::with_capacity(batch.ops.len()),
        changes: 0,
    };

    for op in &batch.ops {
        let mut captured = None;
        match op {
            WriteOp::Insert { row, capture_id } => {
                let (sql, params) = insert_statement(table, row)?;
                outcome.changes += execute(&tx, &sql, &params)?;
                if *capture_id {
                    captured = Some(tx.last_insert_rowid());
                }
            }
            WriteOp::Update { row, id } => {
                if let Some((sql, params)) = update_statement(table, id_attribute, row, id)? {
                    outcome.changes += execute(&tx, &sql, &params)?;
                }
            }
            WriteOp::Delete { id } => {
                let query = query::build(
                    table,
                    &Filter::new().where_eq(id_attribute, id.clone()),
                    Statement::Delete,
                )?;
                outcome.changes += execute(&tx, &query.sql, &query.params)?;
            }
            WriteOp::Clear => {
                outcome.changes += execute(&tx, &format!("DELETE FROM {}", table), &[])?;
            }
        }
        outcome.ids.push(captured);
    }

    tx.commit()?;
    debug!(
        table,
        ops = batch.ops.len(),
        changes = outcome.changes,
        "batch committed"
    );
    Ok(outcome)
}
