use std::{future::Future, pin::Pin, sync::Arc};

use crate::{DbError, SecureTx, StoragePort, TableSpec, TxError};

/// Entry point for transactional work against one storage backend.
///
/// Cloning is cheap; clones share the backend.
#[derive(Clone)]
pub struct DbProvider {
    storage: Arc<dyn StoragePort>,
}

impl std::fmt::Debug for DbProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbProvider")
            .field("engine", &self.storage.engine())
            .finish()
    }
}

impl DbProvider {
    #[must_use]
    pub fn new(storage: Arc<dyn StoragePort>) -> Self {
        Self { storage }
    }

    #[must_use]
    pub fn db_engine(&self) -> &'static str {
        self.storage.engine()
    }

    /// # Errors
    /// See [`StoragePort::ensure_table`].
    pub async fn ensure_table(&self, spec: &TableSpec) -> Result<(), DbError> {
        self.storage.ensure_table(spec).await
    }

    /// Execute a closure inside a transaction.
    ///
    /// The closure receives a [`SecureTx`]. `Ok` commits, `Err` rolls back.
    ///
    /// ```ignore
    /// let id = db
    ///     .in_transaction(move |tx| Box::pin(async move {
    ///         let id = tx.insert(&table, row).await?;
    ///         Ok::<_, DbError>(id)
    ///     }))
    ///     .await
    ///     .map_err(|e| e.into_domain(DomainError::from))?;
    /// ```
    ///
    /// # Errors
    /// - `TxError::Domain(E)` when the closure fails (the transaction is rolled back)
    /// - `TxError::Infra(DbError)` when beginning or committing fails
    pub async fn in_transaction<T, E, F>(&self, f: F) -> Result<T, TxError<E>>
    where
        T: Send + 'static,
        E: Send + 'static,
        F: for<'a> FnOnce(
                &'a mut SecureTx,
            ) -> Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>
            + Send,
    {
        let mut tx = SecureTx::new(self.storage.begin().await.map_err(TxError::Infra)?);

        let res = f(&mut tx).await;

        match res {
            Ok(v) => {
                tx.into_inner().commit().await.map_err(TxError::Infra)?;
                Ok(v)
            }
            Err(e) => {
                if let Err(rollback) = tx.into_inner().rollback().await {
                    tracing::warn!(error = %rollback, "rollback failed");
                }
                Err(TxError::Domain(e))
            }
        }
    }

    /// [`in_transaction`](Self::in_transaction) with storage failures mapped
    /// into the domain error type.
    ///
    /// # Errors
    /// The closure's error, or a begin/commit failure mapped via `map_infra`.
    pub async fn in_transaction_mapped<T, E, F, M>(&self, map_infra: M, f: F) -> Result<T, E>
    where
        T: Send + 'static,
        E: Send + 'static,
        M: FnOnce(DbError) -> E + Send,
        F: for<'a> FnOnce(
                &'a mut SecureTx,
            ) -> Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>
            + Send,
    {
        self.in_transaction(f)
            .await
            .map_err(|e| e.into_domain(map_infra))
    }
}
