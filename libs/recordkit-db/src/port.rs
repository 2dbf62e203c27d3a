//! Transactional storage port.
//!
//! Backends implement [`StoragePort`] and hand out [`StorageTx`] handles.
//! Engine code never touches a `StorageTx` directly; it goes through
//! [`DbProvider`](crate::DbProvider) which wraps each handle in a
//! [`SecureTx`](crate::SecureTx).

use async_trait::async_trait;

use crate::{Condition, DbError, OrderBy, Row};

/// Name of the auto-assigned integer primary key column.
pub const PRIMARY_KEY: &str = "id";

/// Declared shape of a table: its columns and which of them are unique.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TableSpec {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: Vec<String>,
    pub indexed: Vec<String>,
}

impl TableSpec {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn column(mut self, name: impl Into<String>) -> Self {
        self.columns.push(name.into());
        self
    }

    #[must_use]
    pub fn unique(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !self.columns.contains(&name) {
            self.columns.push(name.clone());
        }
        self.unique.push(name);
        self
    }

    #[must_use]
    pub fn indexed(mut self, name: impl Into<String>) -> Self {
        self.indexed.push(name.into());
        self
    }

    /// `true` for declared columns and the primary key.
    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        name == PRIMARY_KEY || self.columns.iter().any(|c| c == name)
    }
}

/// A storage backend.
#[async_trait]
pub trait StoragePort: Send + Sync {
    /// Short backend identifier for tracing / logging.
    fn engine(&self) -> &'static str;

    /// Open a transaction. Dropping the handle without committing rolls back.
    ///
    /// # Errors
    /// Returns [`DbError::Transaction`] when the backend cannot start one.
    async fn begin(&self) -> Result<Box<dyn StorageTx>, DbError>;

    /// Create the table when missing, otherwise add any new columns and
    /// unique constraints. Never drops anything.
    ///
    /// # Errors
    /// Returns [`DbError::Conflict`] when existing rows violate a new unique
    /// constraint.
    async fn ensure_table(&self, spec: &TableSpec) -> Result<(), DbError>;
}

/// An open transaction. Every method sees the transaction's own writes.
#[async_trait]
pub trait StorageTx: Send {
    /// Insert a row and return its primary key.
    async fn insert(&mut self, table: &str, row: Row) -> Result<i64, DbError>;

    async fn select_one(&mut self, table: &str, filter: &Condition)
    -> Result<Option<Row>, DbError>;

    async fn select_many(
        &mut self,
        table: &str,
        filter: &Condition,
        order: &[OrderBy],
        offset: u64,
        limit: Option<u64>,
    ) -> Result<Vec<Row>, DbError>;

    async fn count(&mut self, table: &str, filter: &Condition) -> Result<u64, DbError>;

    /// Merge `patch` into every row matching `filter`; returns the number of rows changed.
    async fn update(&mut self, table: &str, filter: &Condition, patch: &Row)
    -> Result<u64, DbError>;

    async fn delete(&mut self, table: &str, filter: &Condition) -> Result<u64, DbError>;

    async fn commit(self: Box<Self>) -> Result<(), DbError>;

    async fn rollback(self: Box<Self>) -> Result<(), DbError>;
}
