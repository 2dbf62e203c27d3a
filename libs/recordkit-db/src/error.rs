use thiserror::Error;

/// Storage failures surfaced by [`StoragePort`](crate::StoragePort) backends.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DbError {
    #[error("unique constraint violated on {table}.{field}")]
    Conflict { table: String, field: String },

    #[error("table not found: {0}")]
    TableNotFound(String),

    #[error("transaction failed: {0}")]
    Transaction(String),

    #[error("storage error: {0}")]
    Internal(String),
}

impl DbError {
    pub fn conflict(table: impl Into<String>, field: impl Into<String>) -> Self {
        Self::Conflict {
            table: table.into(),
            field: field.into(),
        }
    }

    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Result of a transactional closure: either the caller's own error or a
/// storage failure raised while beginning or committing.
#[derive(Debug)]
pub enum TxError<E> {
    Domain(E),
    Infra(DbError),
}

impl<E> TxError<E> {
    /// Collapse into the domain error type, mapping storage failures with `map_infra`.
    pub fn into_domain<M>(self, map_infra: M) -> E
    where
        M: FnOnce(DbError) -> E,
    {
        match self {
            Self::Domain(e) => e,
            Self::Infra(e) => map_infra(e),
        }
    }
}

impl<E: std::fmt::Display> std::fmt::Display for TxError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Domain(e) => write!(f, "{e}"),
            Self::Infra(e) => write!(f, "{e}"),
        }
    }
}
