//! Versioned, reversible schema steps.
//!
//! A [`Migration`] carries an apply and a revert function. Both drive a
//! [`SchemaOps`] surface, which the store implements on top of a single open
//! transaction. Which steps run is decided by [`plan`], a pure function of
//! the recorded version and the target version.

use std::fmt;
use std::sync::Arc;

use crate::entity::ColumnDef;
use crate::error::SchemaError;
use crate::record::Record;

/// Signature of a migration step body.
pub type StepFn = Arc<dyn Fn(&mut dyn SchemaOps) -> Result<(), SchemaError> + Send + Sync>;

/// Which way a migration run moves the schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Apply,
    Revert,
}

/// The schema surface a migration step may touch.
///
/// Every method translates to exactly one SQL statement against the
/// migration's transaction. Implementations must not commit.
pub trait SchemaOps {
    /// The entity's table.
    fn table(&self) -> &str;

    /// The entity's identity column.
    fn id_attribute(&self) -> &str;

    /// `CREATE TABLE IF NOT EXISTS` with the given columns.
    ///
    /// Adds the default identity column when the entity relies on it and it
    /// is not listed.
    fn create_table(&mut self, columns: &[ColumnDef]) -> Result<(), SchemaError>;

    /// `DROP TABLE IF EXISTS`.
    fn drop_table(&mut self) -> Result<(), SchemaError>;

    fn create_index(&mut self, name: &str, columns: &[&str], unique: bool)
        -> Result<(), SchemaError>;

    /// `DROP INDEX IF EXISTS`.
    fn drop_index(&mut self, name: &str) -> Result<(), SchemaError>;

    /// Insert one row. A generated identity is supplied when required.
    fn insert_row(&mut self, row: &Record) -> Result<(), SchemaError>;

    /// Delete rows matching every column of `matching`. An empty map deletes all rows.
    fn delete_row(&mut self, matching: &Record) -> Result<(), SchemaError>;

    /// Convenience over [`SchemaOps::create_table`] taking `(name, type hint)` pairs.
    fn create_table_with(&mut self, columns: &[(&str, &str)]) -> Result<(), SchemaError> {
        let defs: Vec<ColumnDef> = columns
            .iter()
            .map(|(name, hint)| ColumnDef::new(*name, hint))
            .collect();
        self.create_table(&defs)
    }
}

/// One numbered schema step.
#[derive(Clone)]
pub struct Migration {
    id: u64,
    up: Option<StepFn>,
    down: Option<StepFn>,
}

impl Migration {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            up: None,
            down: None,
        }
    }

    /// Set the apply direction.
    pub fn up<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut dyn SchemaOps) -> Result<(), SchemaError> + Send + Sync + 'static,
    {
        self.up = Some(Arc::new(f));
        self
    }

    /// Set the revert direction.
    pub fn down<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut dyn SchemaOps) -> Result<(), SchemaError> + Send + Sync + 'static,
    {
        self.down = Some(Arc::new(f));
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Run one direction of this step. A missing direction is a no-op.
    pub fn run(&self, ops: &mut dyn SchemaOps, direction: Direction) -> Result<(), SchemaError> {
        let step = match direction {
            Direction::Apply => &self.up,
            Direction::Revert => &self.down,
        };
        match step {
            Some(f) => f(ops),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Migration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Migration")
            .field("id", &self.id)
            .field("up", &self.up.is_some())
            .field("down", &self.down.is_some())
            .finish()
    }
}

/// Select the steps between `current` and `target`, in execution order.
///
/// - Apply: steps with ids in `(current, target]`, ascending. An unset
///   `current` applies everything up to `target`.
/// - Revert: steps with ids in `(target, current]`, descending.
///
/// Equal versions yield an empty plan.
pub fn plan(migrations: &[Migration], current: Option<u64>, target: u64) -> (Direction, Vec<&Migration>) {
    match current {
        Some(current) if current > target => {
            let steps = migrations
                .iter()
                .rev()
                .filter(|m| m.id > target && m.id <= current)
                .collect();
            (Direction::Revert, steps)
        }
        Some(current) => {
            let steps = migrations
                .iter()
                .filter(|m| m.id > current && m.id <= target)
                .collect();
            (Direction::Apply, steps)
        }
        None => {
            let steps = migrations.iter().filter(|m| m.id <= target).collect();
            (Direction::Apply, steps)
        }
    }
}
