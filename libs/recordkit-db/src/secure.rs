//! Scoped transaction wrapper.
//!
//! `SecureTx` does not expose the raw [`StorageTx`]. Every read, update and
//! delete takes an [`AccessScope`] which is compiled against the table's
//! declared columns and AND-ed with the caller's condition, so unscoped
//! access to stored rows cannot be expressed.

use recordkit_security::AccessScope;

use crate::{
    Condition, DbError, OrderBy, Row, StorageTx, TableSpec, cond::build_scope_condition,
    port::PRIMARY_KEY,
};

/// Secure transaction wrapper (capability).
pub struct SecureTx {
    inner: Box<dyn StorageTx>,
}

/// Paging window for [`SecureTx::find_many`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Page {
    pub offset: u64,
    pub limit: Option<u64>,
}

impl SecureTx {
    pub(crate) fn new(inner: Box<dyn StorageTx>) -> Self {
        Self { inner }
    }

    pub(crate) fn into_inner(self) -> Box<dyn StorageTx> {
        self.inner
    }

    fn scoped(table: &TableSpec, scope: &AccessScope, filter: &Condition) -> Condition {
        build_scope_condition(scope, |f| table.has_column(f)).and(filter.clone())
    }

    /// Insert a row. Visibility of the new row is checked by re-reading it
    /// under a scope, not here.
    ///
    /// # Errors
    /// Propagates backend failures, including [`DbError::Conflict`].
    pub async fn insert(&mut self, table: &TableSpec, row: Row) -> Result<i64, DbError> {
        self.inner.insert(&table.name, row).await
    }

    /// # Errors
    /// Propagates backend failures.
    pub async fn find_one(
        &mut self,
        table: &TableSpec,
        scope: &AccessScope,
        filter: &Condition,
    ) -> Result<Option<Row>, DbError> {
        let cond = Self::scoped(table, scope, filter);
        self.inner.select_one(&table.name, &cond).await
    }

    /// # Errors
    /// Propagates backend failures.
    pub async fn find_by_id(
        &mut self,
        table: &TableSpec,
        scope: &AccessScope,
        id: i64,
    ) -> Result<Option<Row>, DbError> {
        self.find_one(table, scope, &Condition::eq(PRIMARY_KEY, id))
            .await
    }

    /// # Errors
    /// Propagates backend failures.
    pub async fn find_many(
        &mut self,
        table: &TableSpec,
        scope: &AccessScope,
        filter: &Condition,
        order: &[OrderBy],
        page: Page,
    ) -> Result<Vec<Row>, DbError> {
        let cond = Self::scoped(table, scope, filter);
        self.inner
            .select_many(&table.name, &cond, order, page.offset, page.limit)
            .await
    }

    /// # Errors
    /// Propagates backend failures.
    pub async fn count(
        &mut self,
        table: &TableSpec,
        scope: &AccessScope,
        filter: &Condition,
    ) -> Result<u64, DbError> {
        let cond = Self::scoped(table, scope, filter);
        self.inner.count(&table.name, &cond).await
    }

    /// Apply `patch` to rows visible under `scope` and matching `filter`.
    ///
    /// # Errors
    /// Propagates backend failures, including [`DbError::Conflict`].
    pub async fn update_many(
        &mut self,
        table: &TableSpec,
        scope: &AccessScope,
        filter: &Condition,
        patch: &Row,
    ) -> Result<u64, DbError> {
        let cond = Self::scoped(table, scope, filter);
        self.inner.update(&table.name, &cond, patch).await
    }

    /// # Errors
    /// Propagates backend failures.
    pub async fn delete_many(
        &mut self,
        table: &TableSpec,
        scope: &AccessScope,
        filter: &Condition,
    ) -> Result<u64, DbError> {
        let cond = Self::scoped(table, scope, filter);
        self.inner.delete(&table.name, &cond).await
    }
}
