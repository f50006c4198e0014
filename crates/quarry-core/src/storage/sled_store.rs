//! Sled-backed persistent store.
//!
//! Every row lives in one tree under `entity \0 key`, encoded with rkyv.
//! Integer sequences live in the same tree under a `\xff` prefix that no
//! UTF-8 entity name can produce, so one batch commits rows and sequences
//! together.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use sled::{Batch, Db, Tree};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

use super::table::{self, TableStore};
use super::{
    FetchRequest, SledStoreConfig, StorageBackend, StorageTransaction, StorageWrite, WriteOutcome,
};
use crate::error::StorageError;
use quarry_proto::Row;

/// Tree holding rows and sequences.
const ROWS_TREE: &str = "rows";

/// Prefix for sequence counters.
const SEQUENCE_PREFIX: &[u8] = b"\xffseq\0";

fn table_prefix(entity: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(entity.len() + 1);
    prefix.extend_from_slice(entity.as_bytes());
    prefix.push(0);
    prefix
}

fn row_key(entity: &str, key: &[u8]) -> Vec<u8> {
    let mut full = table_prefix(entity);
    full.extend_from_slice(key);
    full
}

fn sequence_key(entity: &str) -> Vec<u8> {
    let mut key = SEQUENCE_PREFIX.to_vec();
    key.extend_from_slice(entity.as_bytes());
    key
}

/// Committed tree contents with uncommitted changes layered on top.
struct Overlay {
    tree: Tree,
    /// `None` marks a removed row.
    rows: HashMap<String, BTreeMap<Vec<u8>, Option<Row>>>,
    sequences: HashMap<String, i64>,
}

impl Overlay {
    fn new(tree: Tree) -> Self {
        Self {
            tree,
            rows: HashMap::new(),
            sequences: HashMap::new(),
        }
    }

    fn is_empty(&self) -> bool {
        self.rows.is_empty() && self.sequences.is_empty()
    }

    /// Fold the changes into one atomic batch.
    fn into_batch(self) -> Result<Batch, StorageError> {
        let mut batch = Batch::default();
        for (entity, changes) in self.rows {
            for (key, change) in changes {
                let full = row_key(&entity, &key);
                match change {
                    Some(row) => batch.insert(full, row.to_bytes()?),
                    None => batch.remove(full),
                }
            }
        }
        for (entity, value) in self.sequences {
            batch.insert(sequence_key(&entity), &value.to_be_bytes()[..]);
        }
        Ok(batch)
    }
}

impl TableStore for Overlay {
    fn scan(&self, entity: &str) -> Result<Vec<(Vec<u8>, Row)>, StorageError> {
        let prefix = table_prefix(entity);
        let mut rows = BTreeMap::new();
        for item in self.tree.scan_prefix(&prefix) {
            let (key, bytes) = item?;
            rows.insert(key[prefix.len()..].to_vec(), Row::from_bytes(&bytes)?);
        }

        if let Some(changes) = self.rows.get(entity) {
            for (key, change) in changes {
                match change {
                    Some(row) => {
                        rows.insert(key.clone(), row.clone());
                    }
                    None => {
                        rows.remove(key);
                    }
                }
            }
        }
        Ok(rows.into_iter().collect())
    }

    fn contains(&self, entity: &str, key: &[u8]) -> Result<bool, StorageError> {
        match self.rows.get(entity).and_then(|changes| changes.get(key)) {
            Some(change) => Ok(change.is_some()),
            None => Ok(self.tree.contains_key(row_key(entity, key))?),
        }
    }

    fn put(&mut self, entity: &str, key: Vec<u8>, row: Row) -> Result<(), StorageError> {
        self.rows
            .entry(entity.to_string())
            .or_default()
            .insert(key, Some(row));
        Ok(())
    }

    fn remove(&mut self, entity: &str, key: &[u8]) -> Result<(), StorageError> {
        self.rows
            .entry(entity.to_string())
            .or_default()
            .insert(key.to_vec(), None);
        Ok(())
    }

    fn sequence(&self, entity: &str) -> Result<i64, StorageError> {
        if let Some(value) = self.sequences.get(entity) {
            return Ok(*value);
        }
        match self.tree.get(sequence_key(entity))? {
            Some(bytes) => {
                let raw: [u8; 8] = bytes[..].try_into().map_err(|_| {
                    StorageError::Backend(format!("corrupt sequence for {entity}"))
                })?;
                Ok(i64::from_be_bytes(raw))
            }
            None => Ok(0),
        }
    }

    fn set_sequence(&mut self, entity: &str, value: i64) -> Result<(), StorageError> {
        self.sequences.insert(entity.to_string(), value);
        Ok(())
    }
}

/// A persistent store on a sled database.
///
/// One write scope is open at a time. Its changes are buffered and applied
/// as a single sled batch on commit.
#[derive(Clone)]
pub struct SledStore {
    db: Db,
    tree: Tree,
    flush_on_commit: bool,
    writer: Arc<Mutex<()>>,
}

impl SledStore {
    /// Open or create a store with the given configuration.
    pub fn open(config: SledStoreConfig) -> Result<Self, StorageError> {
        let db = config.to_sled_config().open()?;
        let tree = db.open_tree(ROWS_TREE)?;
        info!(
            path = %config.path.display(),
            recovered = db.was_recovered(),
            "opened sled store"
        );

        Ok(Self {
            db,
            tree,
            flush_on_commit: config.flush_on_commit,
            writer: Arc::new(Mutex::new(())),
        })
    }

    /// Check if the database was recovered from a previous run.
    pub fn was_recovered(&self) -> bool {
        self.db.was_recovered()
    }

    /// Number of committed rows of an entity.
    pub fn row_count(&self, entity: &str) -> usize {
        self.tree.scan_prefix(table_prefix(entity)).count()
    }

    /// Flush pending writes to disk.
    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for SledStore {
    async fn execute_read(&self, request: &FetchRequest) -> Result<Vec<Row>, StorageError> {
        table::read(&Overlay::new(self.tree.clone()), request)
    }

    async fn begin(&self) -> Result<Box<dyn StorageTransaction>, StorageError> {
        let guard = self.writer.clone().lock_owned().await;
        Ok(Box::new(SledTransaction {
            overlay: Overlay::new(self.tree.clone()),
            flush_on_commit: self.flush_on_commit,
            _guard: guard,
        }))
    }
}

/// Write scope of a [`SledStore`].
struct SledTransaction {
    overlay: Overlay,
    flush_on_commit: bool,
    _guard: OwnedMutexGuard<()>,
}

#[async_trait]
impl StorageTransaction for SledTransaction {
    async fn execute_read(&self, request: &FetchRequest) -> Result<Vec<Row>, StorageError> {
        table::read(&self.overlay, request)
    }

    async fn execute_mutation(&mut self, write: &StorageWrite) -> Result<WriteOutcome, StorageError> {
        table::write(&mut self.overlay, write)
    }

    async fn commit(self: Box<Self>) -> Result<(), StorageError> {
        let SledTransaction {
            overlay,
            flush_on_commit,
            _guard,
        } = *self;
        if overlay.is_empty() {
            return Ok(());
        }

        let tree = overlay.tree.clone();
        tree.apply_batch(overlay.into_batch()?)?;
        if flush_on_commit {
            tree.flush()?;
        }
        debug!("sled store committed");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StorageError> {
        debug!("sled store rolled back");
        Ok(())
    }
}
