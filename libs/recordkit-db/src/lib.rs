#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! Storage layer for the record engine.
//!
//! Rows are JSON objects. Backends implement [`StoragePort`]; callers obtain
//! scoped transactions from a [`DbProvider`] and can only reach stored rows
//! through [`SecureTx`], which requires an
//! [`AccessScope`](recordkit_security::AccessScope) on every read and write.
//!
//! ```
//! use recordkit_db::{Condition, build_scope_condition};
//! use recordkit_security::{AccessScope, ScopeConstraint, ScopeFilter};
//!
//! let scope = AccessScope::single(ScopeConstraint::new(vec![
//!     ScopeFilter::eq("creator", "alice@example.com"),
//! ]));
//! let cond = build_scope_condition(&scope, |field| field == "creator");
//! assert_ne!(cond, Condition::False);
//! ```

pub mod cond;
pub mod error;
pub mod memory;
pub mod order;
pub mod port;
pub mod provider;
pub mod secure;

/// A stored record: column name to JSON value.
pub type Row = serde_json::Map<String, serde_json::Value>;

pub use cond::{Condition, build_scope_condition};
pub use error::{DbError, TxError};
pub use memory::InMemoryStorage;
pub use order::{OrderBy, SortDirection};
pub use port::{PRIMARY_KEY, StoragePort, StorageTx, TableSpec};
pub use provider::DbProvider;
pub use secure::{Page, SecureTx};
