//! In-memory transactional backend.
//!
//! A transaction holds the store's mutex for its whole lifetime and works on
//! a private copy of the tables; commit swaps the copy in, drop discards it.
//! Transactions are therefore serialised, which makes filtered updates
//! atomic with respect to each other.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{
    Condition, DbError, OrderBy, Row, StoragePort, StorageTx, TableSpec,
    cond::values_equal,
    order::sort_rows,
    port::PRIMARY_KEY,
};

#[derive(Clone, Debug, Default)]
struct Table {
    spec: TableSpec,
    rows: BTreeMap<i64, Row>,
    last_id: i64,
}

impl Table {
    /// Find the first unique column on which `row` collides with a stored row
    /// other than `skip`.
    fn unique_violation(&self, row: &Row, skip: Option<i64>) -> Option<&str> {
        self.spec.unique.iter().map(String::as_str).find(|col| {
            let Some(v) = row.get(*col).filter(|v| !v.is_null()) else {
                return false;
            };
            self.rows
                .iter()
                .filter(|(id, _)| Some(**id) != skip)
                .any(|(_, other)| other.get(*col).is_some_and(|o| values_equal(o, v)))
        })
    }
}

type Tables = HashMap<String, Table>;

/// Process-local storage backend.
#[derive(Clone, Default)]
pub struct InMemoryStorage {
    tables: Arc<Mutex<Tables>>,
}

impl InMemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StoragePort for InMemoryStorage {
    fn engine(&self) -> &'static str {
        "memory"
    }

    async fn begin(&self) -> Result<Box<dyn StorageTx>, DbError> {
        let guard = Arc::clone(&self.tables).lock_owned().await;
        let work = guard.clone();
        Ok(Box::new(InMemoryTx { guard, work }))
    }

    async fn ensure_table(&self, spec: &TableSpec) -> Result<(), DbError> {
        let mut tables = self.tables.lock().await;
        if !tables.contains_key(&spec.name) {
            tracing::debug!(table = %spec.name, "creating table");
            tables.insert(
                spec.name.clone(),
                Table {
                    spec: spec.clone(),
                    ..Table::default()
                },
            );
            return Ok(());
        }
        let Some(table) = tables.get_mut(&spec.name) else {
            return Ok(());
        };

        let mut upgraded = table.spec.clone();
        for col in &spec.columns {
            if !upgraded.columns.contains(col) {
                upgraded.columns.push(col.clone());
            }
        }
        for col in &spec.indexed {
            if !upgraded.indexed.contains(col) {
                upgraded.indexed.push(col.clone());
            }
        }
        let new_unique: Vec<&String> = spec
            .unique
            .iter()
            .filter(|c| !upgraded.unique.contains(c))
            .collect();
        for col in new_unique {
            let mut seen: Vec<&Value> = Vec::new();
            for row in table.rows.values() {
                let Some(v) = row.get(col).filter(|v| !v.is_null()) else {
                    continue;
                };
                if seen.iter().any(|s| values_equal(s, v)) {
                    return Err(DbError::conflict(&spec.name, col));
                }
                seen.push(v);
            }
            upgraded.unique.push(col.clone());
        }

        if upgraded != table.spec {
            tracing::debug!(table = %spec.name, "upgrading table");
            table.spec = upgraded;
        }
        Ok(())
    }
}

struct InMemoryTx {
    guard: OwnedMutexGuard<Tables>,
    work: Tables,
}

impl InMemoryTx {
    fn table(&self, name: &str) -> Result<&Table, DbError> {
        self.work
            .get(name)
            .ok_or_else(|| DbError::TableNotFound(name.to_owned()))
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut Table, DbError> {
        self.work
            .get_mut(name)
            .ok_or_else(|| DbError::TableNotFound(name.to_owned()))
    }
}

#[async_trait]
impl StorageTx for InMemoryTx {
    async fn insert(&mut self, table: &str, mut row: Row) -> Result<i64, DbError> {
        let t = self.table_mut(table)?;
        let id = match row.get(PRIMARY_KEY).and_then(Value::as_i64) {
            Some(id) if t.rows.contains_key(&id) => {
                return Err(DbError::conflict(table, PRIMARY_KEY));
            }
            Some(id) => id,
            None => t.last_id + 1,
        };
        row.insert(PRIMARY_KEY.to_owned(), Value::from(id));
        if let Some(col) = t.unique_violation(&row, None) {
            return Err(DbError::conflict(table, col));
        }
        t.last_id = t.last_id.max(id);
        t.rows.insert(id, row);
        Ok(id)
    }

    async fn select_one(
        &mut self,
        table: &str,
        filter: &Condition,
    ) -> Result<Option<Row>, DbError> {
        Ok(self
            .table(table)?
            .rows
            .values()
            .find(|r| filter.matches(r))
            .cloned())
    }

    async fn select_many(
        &mut self,
        table: &str,
        filter: &Condition,
        order: &[OrderBy],
        offset: u64,
        limit: Option<u64>,
    ) -> Result<Vec<Row>, DbError> {
        let mut rows: Vec<Row> = self
            .table(table)?
            .rows
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        sort_rows(&mut rows, order);
        let skip = usize::try_from(offset).unwrap_or(usize::MAX);
        let take = limit.map_or(usize::MAX, |l| usize::try_from(l).unwrap_or(usize::MAX));
        Ok(rows.into_iter().skip(skip).take(take).collect())
    }

    async fn count(&mut self, table: &str, filter: &Condition) -> Result<u64, DbError> {
        let n = self
            .table(table)?
            .rows
            .values()
            .filter(|r| filter.matches(r))
            .count();
        Ok(u64::try_from(n).unwrap_or(u64::MAX))
    }

    async fn update(
        &mut self,
        table: &str,
        filter: &Condition,
        patch: &Row,
    ) -> Result<u64, DbError> {
        let t = self.table_mut(table)?;
        let ids: Vec<i64> = t
            .rows
            .iter()
            .filter(|(_, r)| filter.matches(r))
            .map(|(id, _)| *id)
            .collect();

        for id in &ids {
            let Some(current) = t.rows.get(id) else {
                continue;
            };
            let mut next = current.clone();
            for (k, v) in patch {
                if k != PRIMARY_KEY {
                    next.insert(k.clone(), v.clone());
                }
            }
            if let Some(col) = t.unique_violation(&next, Some(*id)) {
                return Err(DbError::conflict(table, col));
            }
            t.rows.insert(*id, next);
        }
        Ok(u64::try_from(ids.len()).unwrap_or(u64::MAX))
    }

    async fn delete(&mut self, table: &str, filter: &Condition) -> Result<u64, DbError> {
        let t = self.table_mut(table)?;
        let before = t.rows.len();
        t.rows.retain(|_, r| !filter.matches(r));
        Ok(u64::try_from(before - t.rows.len()).unwrap_or(u64::MAX))
    }

    async fn commit(self: Box<Self>) -> Result<(), DbError> {
        let Self { mut guard, work } = *self;
        *guard = work;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), DbError> {
        Ok(())
    }
}
