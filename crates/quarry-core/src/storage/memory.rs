//! In-memory reference store.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use super::table::{self, TableStore};
use super::{FetchRequest, StorageBackend, StorageTransaction, StorageWrite, WriteOutcome};
use crate::error::StorageError;
use quarry_proto::Row;

#[derive(Debug, Clone, Default)]
struct Tables {
    rows: HashMap<String, BTreeMap<Vec<u8>, Row>>,
    sequences: HashMap<String, i64>,
}

impl TableStore for Tables {
    fn scan(&self, entity: &str) -> Result<Vec<(Vec<u8>, Row)>, StorageError> {
        Ok(self
            .rows
            .get(entity)
            .map(|t| t.iter().map(|(k, r)| (k.clone(), r.clone())).collect())
            .unwrap_or_default())
    }

    fn contains(&self, entity: &str, key: &[u8]) -> Result<bool, StorageError> {
        Ok(self.rows.get(entity).is_some_and(|t| t.contains_key(key)))
    }

    fn put(&mut self, entity: &str, key: Vec<u8>, row: Row) -> Result<(), StorageError> {
        self.rows.entry(entity.to_string()).or_default().insert(key, row);
        Ok(())
    }

    fn remove(&mut self, entity: &str, key: &[u8]) -> Result<(), StorageError> {
        if let Some(table) = self.rows.get_mut(entity) {
            table.remove(key);
        }
        Ok(())
    }

    fn sequence(&self, entity: &str) -> Result<i64, StorageError> {
        Ok(self.sequences.get(entity).copied().unwrap_or(0))
    }

    fn set_sequence(&mut self, entity: &str, value: i64) -> Result<(), StorageError> {
        self.sequences.insert(entity.to_string(), value);
        Ok(())
    }
}

/// A store keeping every table in memory.
///
/// Clones share the same data. One write scope is open at a time; it works
/// on a private copy of the tables that replaces the shared state on commit.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<Tables>>,
    writer: Arc<Mutex<()>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed rows of an entity.
    pub fn row_count(&self, entity: &str) -> usize {
        self.state.read().rows.get(entity).map_or(0, BTreeMap::len)
    }
}

#[async_trait]
impl StorageBackend for MemoryStore {
    async fn execute_read(&self, request: &FetchRequest) -> Result<Vec<Row>, StorageError> {
        let state = self.state.read();
        table::read(&*state, request)
    }

    async fn begin(&self) -> Result<Box<dyn StorageTransaction>, StorageError> {
        let guard = self.writer.clone().lock_owned().await;
        let working = self.state.read().clone();
        Ok(Box::new(MemoryTransaction {
            state: self.state.clone(),
            working,
            _guard: guard,
        }))
    }
}

/// Write scope of a [`MemoryStore`].
struct MemoryTransaction {
    state: Arc<RwLock<Tables>>,
    working: Tables,
    _guard: OwnedMutexGuard<()>,
}

#[async_trait]
impl StorageTransaction for MemoryTransaction {
    async fn execute_read(&self, request: &FetchRequest) -> Result<Vec<Row>, StorageError> {
        table::read(&self.working, request)
    }

    async fn execute_mutation(&mut self, write: &StorageWrite) -> Result<WriteOutcome, StorageError> {
        table::write(&mut self.working, write)
    }

    async fn commit(self: Box<Self>) -> Result<(), StorageError> {
        let MemoryTransaction { state, working, _guard } = *self;
        *state.write() = working;
        debug!("memory store committed");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StorageError> {
        debug!("memory store rolled back");
        Ok(())
    }
}
