//! Row-table execution shared by the reference stores.
//!
//! A store exposes its tables through [`TableStore`]; reads and writes are
//! then carried out here by scanning, evaluating predicates in memory and
//! writing rows back by identity key.

use crate::catalog::ScalarType;
use crate::error::StorageError;
use crate::query::{apply_window, values_equal, PredicateEvaluator, PredicatePlan, RowSource};
use quarry_proto::{Row, Value};

use super::{apply_delta, FetchRequest, IdentityGen, StorageWrite, WriteOutcome};

/// Keyed row tables of one store view.
pub(crate) trait TableStore {
    /// All rows of an entity with their keys.
    fn scan(&self, entity: &str) -> Result<Vec<(Vec<u8>, Row)>, StorageError>;

    /// Check if a key is present.
    fn contains(&self, entity: &str, key: &[u8]) -> Result<bool, StorageError>;

    /// Insert or replace a row.
    fn put(&mut self, entity: &str, key: Vec<u8>, row: Row) -> Result<(), StorageError>;

    /// Remove a row.
    fn remove(&mut self, entity: &str, key: &[u8]) -> Result<(), StorageError>;

    /// Last value handed out by the entity's integer sequence.
    fn sequence(&self, entity: &str) -> Result<i64, StorageError>;

    /// Record the last value of the entity's integer sequence.
    fn set_sequence(&mut self, entity: &str, value: i64) -> Result<(), StorageError>;
}

/// Adapts a table store to the predicate evaluator.
struct Snapshot<'a, T: ?Sized>(&'a T);

impl<T: TableStore + ?Sized> RowSource for Snapshot<'_, T> {
    fn rows_of(&self, entity: &str) -> Result<Vec<Row>, StorageError> {
        Ok(self.0.scan(entity)?.into_iter().map(|(_, row)| row).collect())
    }
}

/// Encode an identity value as a table key.
pub(crate) fn encode_key(value: &Value) -> Result<Vec<u8>, StorageError> {
    let mut key = Vec::with_capacity(17);
    match value {
        Value::Int32(_) | Value::Int64(_) => {
            let n = value.as_i64().unwrap_or_default();
            key.push(b'i');
            // Flip the sign bit so keys sort numerically.
            key.extend_from_slice(&((n as u64) ^ (1 << 63)).to_be_bytes());
        }
        Value::Uuid(u) => {
            key.push(b'u');
            key.extend_from_slice(u);
        }
        Value::String(s) => {
            key.push(b's');
            key.extend_from_slice(s.as_bytes());
        }
        Value::Bytes(b) => {
            key.push(b'b');
            key.extend_from_slice(b);
        }
        Value::Timestamp(t) => {
            key.push(b't');
            key.extend_from_slice(&((*t as u64) ^ (1 << 63)).to_be_bytes());
        }
        other => {
            return Err(StorageError::Backend(format!(
                "{} values cannot be used as identities",
                other.type_name()
            )))
        }
    }
    Ok(key)
}

/// Rows of `store` matching a fetch request, in store order.
pub(crate) fn read<T: TableStore + ?Sized>(
    store: &T,
    request: &FetchRequest,
) -> Result<Vec<Row>, StorageError> {
    let mut rows: Vec<Row> = store
        .scan(&request.entity)?
        .into_iter()
        .map(|(_, row)| row)
        .collect();

    if let Some(filter) = &request.key_filter {
        rows.retain(|row| {
            row.get(&filter.field)
                .is_some_and(|v| filter.values.iter().any(|k| values_equal(v, k)))
        });
    }

    let snapshot = Snapshot(store);
    let rows = PredicateEvaluator::new(&snapshot).filter(&request.predicate, rows)?;
    Ok(match &request.window {
        Some(window) => apply_window(rows, window),
        None => rows,
    })
}

/// Keys of rows matching a predicate, evaluated before any change.
fn matching_keys<T: TableStore + ?Sized>(
    store: &T,
    entity: &str,
    predicate: &PredicatePlan,
) -> Result<Vec<(Vec<u8>, Row)>, StorageError> {
    let snapshot = Snapshot(store);
    let prepared = PredicateEvaluator::new(&snapshot).prepare(predicate)?;
    let mut matched = store.scan(entity)?;
    matched.retain(|(_, row)| prepared.matches(row));
    Ok(matched)
}

/// Apply one write to `store`.
pub(crate) fn write<T: TableStore + ?Sized>(
    store: &mut T,
    write: &StorageWrite,
) -> Result<WriteOutcome, StorageError> {
    match write {
        StorageWrite::Insert {
            entity,
            identity_field,
            identity,
            values,
        } => {
            let mut row = values.clone();
            let mut generated_ids = Vec::new();
            let id = match identity {
                IdentityGen::Provided => row
                    .get(identity_field)
                    .filter(|v| !v.is_null())
                    .cloned()
                    .ok_or_else(|| {
                        StorageError::Backend(format!("{entity} row is missing its identity"))
                    })?,
                IdentityGen::Uuid => {
                    let id = Value::Uuid(*uuid::Uuid::new_v4().as_bytes());
                    generated_ids.push(id.clone());
                    id
                }
                IdentityGen::Sequence(scalar) => {
                    let next = store.sequence(entity)? + 1;
                    let id = match scalar {
                        ScalarType::Int32 => Value::Int32(i32::try_from(next).map_err(|_| {
                            StorageError::Backend(format!("{entity} sequence exhausted"))
                        })?),
                        _ => Value::Int64(next),
                    };
                    generated_ids.push(id.clone());
                    id
                }
            };

            if let Some(n) = id.as_i64() {
                if n > store.sequence(entity)? {
                    store.set_sequence(entity, n)?;
                }
            }
            row.set(identity_field.clone(), id.clone());

            let key = encode_key(&id)?;
            if store.contains(entity, &key)? {
                return Err(StorageError::DuplicateKey {
                    entity: entity.clone(),
                    key: id.to_string(),
                });
            }
            store.put(entity, key, row)?;
            Ok(WriteOutcome {
                affected: 1,
                generated_ids,
            })
        }
        StorageWrite::Update {
            entity,
            predicate,
            assignments,
        } => {
            let matched = matching_keys(store, entity, predicate)?;
            let affected = matched.len() as u64;
            for (key, mut row) in matched {
                for assignment in assignments {
                    let current = row.get(&assignment.field).cloned().unwrap_or(Value::Null);
                    row.set(assignment.field.clone(), apply_delta(&current, &assignment.delta)?);
                }
                store.put(entity, key, row)?;
            }
            Ok(WriteOutcome {
                affected,
                generated_ids: Vec::new(),
            })
        }
        StorageWrite::Delete { entity, predicate } => {
            let matched = matching_keys(store, entity, predicate)?;
            for (key, _) in &matched {
                store.remove(entity, key)?;
            }
            Ok(WriteOutcome {
                affected: matched.len() as u64,
                generated_ids: Vec::new(),
            })
        }
    }
}
