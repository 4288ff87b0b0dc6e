//! Store trait: the abstract interface to the local relational cache.
//!
//! The reconciliation engine is written against this trait only. Reads go
//! through the query builder; writes are collected into a [`WriteBatch`] and
//! applied as one transaction.

use std::collections::HashSet;

use async_trait::async_trait;
use harbor_core::{EntityDescriptor, Filter, Identity, RawQuery, Record, SqlValue};

use crate::error::Result;
use crate::migration::{MigrationReport, SchemaState};

/// One write inside a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// `INSERT INTO t (cols) VALUES (?...)`.
    ///
    /// With `capture_id`, `last_insert_rowid()` is read back inside the
    /// same transaction and reported in [`BatchOutcome::ids`].
    Insert { row: Record, capture_id: bool },
    /// `UPDATE t SET c = ?... WHERE id = ?`.
    Update { row: Record, id: SqlValue },
    /// `DELETE FROM t WHERE id = ?`.
    Delete { id: SqlValue },
    /// `DELETE FROM t`.
    Clear,
}

/// Writes against one table, committed together.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteBatch {
    pub table: String,
    pub id_attribute: String,
    pub ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new(table: impl Into<String>, id_attribute: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            id_attribute: id_attribute.into(),
            ops: Vec::new(),
        }
    }

    /// Start a batch for an entity's table.
    pub fn for_entity(entity: &EntityDescriptor) -> Self {
        Self::new(entity.table(), entity.id_attribute())
    }

    pub fn insert(&mut self, row: Record, capture_id: bool) {
        self.ops.push(WriteOp::Insert { row, capture_id });
    }

    pub fn update(&mut self, row: Record, id: SqlValue) {
        self.ops.push(WriteOp::Update { row, id });
    }

    pub fn delete(&mut self, id: SqlValue) {
        self.ops.push(WriteOp::Delete { id });
    }

    pub fn clear(&mut self) {
        self.ops.push(WriteOp::Clear);
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }
}

/// Result of applying a [`WriteBatch`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// One slot per op: the captured row id for inserts with `capture_id`.
    pub ids: Vec<Option<i64>>,
    /// Total rows changed.
    pub changes: usize,
}

/// The Store trait: async interface to the local cache.
///
/// All methods are async so that blocking engines can hand work off to a
/// worker thread. For SQLite this is `spawn_blocking`.
#[async_trait]
pub trait Store: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Schema
    // ─────────────────────────────────────────────────────────────────────────

    /// Bring the entity's table to its target schema version.
    async fn migrate(&self, entity: &EntityDescriptor) -> Result<MigrationReport>;

    /// Report the recorded schema version without changing anything.
    async fn schema_state(&self, entity: &EntityDescriptor) -> Result<SchemaState>;

    // ─────────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────────

    /// Run a built SELECT over `table`.
    async fn query(&self, table: &str, filter: &Filter) -> Result<Vec<Record>>;

    /// Run caller-supplied SQL.
    async fn query_raw(&self, raw: &RawQuery) -> Result<Vec<Record>>;

    /// The full set of identities currently in `table`.
    async fn identities(&self, table: &str, id_attribute: &str) -> Result<HashSet<Identity>>;

    /// Point lookup by identity.
    ///
    /// Returns the row only when exactly one row matches.
    async fn find(&self, table: &str, id_attribute: &str, id: &SqlValue)
        -> Result<Option<Record>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Writes
    // ─────────────────────────────────────────────────────────────────────────

    /// Apply every op of the batch in one transaction.
    async fn apply(&self, batch: WriteBatch) -> Result<BatchOutcome>;

    /// Delete the rows of `table` matching `filter`. Returns rows removed.
    async fn delete_where(&self, table: &str, filter: &Filter) -> Result<usize>;
}

/// Extension trait for common store patterns.
pub trait StoreExt: Store {
    /// Whether `id` is known locally.
    fn contains(
        &self,
        entity: &EntityDescriptor,
        id: &SqlValue,
    ) -> impl std::future::Future<Output = Result<bool>> + Send;

    /// Every row of the entity's table.
    fn all(
        &self,
        entity: &EntityDescriptor,
    ) -> impl std::future::Future<Output = Result<Vec<Record>>> + Send;
}

impl<S: Store + ?Sized> StoreExt for S {
    async fn contains(&self, entity: &EntityDescriptor, id: &SqlValue) -> Result<bool> {
        if id.is_null() {
            return Ok(false);
        }
        Ok(self
            .find(entity.table(), entity.id_attribute(), id)
            .await?
            .is_some())
    }

    async fn all(&self, entity: &EntityDescriptor) -> Result<Vec<Record>> {
        self.query(entity.table(), &Filter::new()).await
    }
}
