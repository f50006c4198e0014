//! Storage collaborator contract and reference stores.
//!
//! The engine hands resolved plans to a [`StorageBackend`]: reads as
//! [`FetchRequest`]s and writes as [`StorageWrite`]s issued inside a
//! [`StorageTransaction`] scope. Dropping a scope without committing rolls
//! it back.
//!
//! Two reference stores ship with the engine: [`MemoryStore`] and the
//! sled-backed [`SledStore`]. Both filter in memory with the predicate
//! evaluator and serialize writers, giving each scope a private overlay that
//! is published atomically on commit.

mod config;
mod memory;
mod sled_store;
mod table;

pub use config::SledStoreConfig;
pub use memory::MemoryStore;
pub use sled_store::SledStore;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tracing::warn;

use crate::catalog::ScalarType;
use crate::error::{Error, StorageError};
use crate::query::{PredicatePlan, WindowDirective};
use quarry_proto::{FieldDelta, Row, Value};

/// Restrict a fetch to rows whose `field` equals one of `values`.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyFilter {
    pub field: String,
    pub values: Vec<Value>,
}

/// One read handed to storage.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    /// Entity to read.
    pub entity: String,
    /// Rows must satisfy this predicate.
    pub predicate: PredicatePlan,
    /// Batched key restriction for dependent fetches.
    pub key_filter: Option<KeyFilter>,
    /// Result window; None returns every matching row in any order.
    pub window: Option<WindowDirective>,
}

impl FetchRequest {
    /// Read every row of an entity matching a predicate.
    pub fn new(entity: impl Into<String>, predicate: PredicatePlan) -> Self {
        Self {
            entity: entity.into(),
            predicate,
            key_filter: None,
            window: None,
        }
    }

    /// Restrict to a set of key values.
    pub fn with_key_filter(mut self, filter: KeyFilter) -> Self {
        self.key_filter = Some(filter);
        self
    }

    /// Apply a result window.
    pub fn with_window(mut self, window: WindowDirective) -> Self {
        self.window = Some(window);
        self
    }
}

/// How the identity of an inserted row is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityGen {
    /// The row already carries its identity.
    Provided,
    /// Generate a random UUID.
    Uuid,
    /// Take the next value of the entity's integer sequence.
    Sequence(ScalarType),
}

/// A field change applied by an update, operand already typed.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub field: String,
    pub delta: FieldDelta,
}

/// One write handed to storage.
#[derive(Debug, Clone, PartialEq)]
pub enum StorageWrite {
    /// Insert a row.
    Insert {
        entity: String,
        identity_field: String,
        identity: IdentityGen,
        values: Row,
    },
    /// Apply assignments to every row matching a predicate.
    Update {
        entity: String,
        predicate: PredicatePlan,
        assignments: Vec<Assignment>,
    },
    /// Remove every row matching a predicate.
    Delete {
        entity: String,
        predicate: PredicatePlan,
    },
}

impl StorageWrite {
    /// Entity the write targets.
    pub fn entity(&self) -> &str {
        match self {
            StorageWrite::Insert { entity, .. }
            | StorageWrite::Update { entity, .. }
            | StorageWrite::Delete { entity, .. } => entity,
        }
    }
}

/// Outcome of one write.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteOutcome {
    /// Rows inserted, updated or deleted.
    pub affected: u64,
    /// Identities generated by an insert.
    pub generated_ids: Vec<Value>,
}

/// A data store the engine reads from and opens write scopes on.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Read committed rows.
    async fn execute_read(&self, request: &FetchRequest) -> Result<Vec<Row>, StorageError>;

    /// Open an atomic write scope.
    async fn begin(&self) -> Result<Box<dyn StorageTransaction>, StorageError>;
}

/// An open write scope. Dropping it uncommitted discards its writes.
#[async_trait]
pub trait StorageTransaction: Send + Sync {
    /// Read rows as seen by this scope, including its own writes.
    async fn execute_read(&self, request: &FetchRequest) -> Result<Vec<Row>, StorageError>;

    /// Apply a write inside this scope.
    async fn execute_mutation(&mut self, write: &StorageWrite) -> Result<WriteOutcome, StorageError>;

    /// Publish every write of this scope atomically.
    async fn commit(self: Box<Self>) -> Result<(), StorageError>;

    /// Discard every write of this scope.
    async fn rollback(self: Box<Self>) -> Result<(), StorageError>;
}

/// Run `f` inside a write scope, committing on success and rolling back on error.
///
/// ```ignore
/// let outcome = with_transaction(&store, |tx| Box::pin(async move {
///     Ok(tx.execute_mutation(&write).await?)
/// })).await?;
/// ```
pub async fn with_transaction<S, T, F>(storage: &S, f: F) -> Result<T, Error>
where
    S: StorageBackend + ?Sized,
    F: for<'t> FnOnce(&'t mut dyn StorageTransaction) -> BoxFuture<'t, Result<T, Error>>,
{
    let mut tx = storage.begin().await?;
    match f(tx.as_mut()).await {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(error = %rollback_err, "rollback failed");
            }
            Err(err)
        }
    }
}

/// Compute the new value of a field under a delta.
///
/// Arithmetic keeps the field's numeric type; null stays null.
pub fn apply_delta(current: &Value, delta: &FieldDelta) -> Result<Value, StorageError> {
    let operand = match delta {
        FieldDelta::Set(value) => return Ok(value.clone()),
        other => other.operand(),
    };
    if current.is_null() {
        return Ok(Value::Null);
    }

    let overflow = || StorageError::Backend(format!("arithmetic overflow applying {delta:?}"));
    match current {
        Value::Int32(a) => {
            let b = operand
                .as_i64()
                .and_then(|b| i32::try_from(b).ok())
                .ok_or_else(overflow)?;
            let result = match delta {
                FieldDelta::Increment(_) => a.checked_add(b),
                FieldDelta::Decrement(_) => a.checked_sub(b),
                FieldDelta::Multiply(_) => a.checked_mul(b),
                FieldDelta::Divide(_) => a.checked_div(b),
                FieldDelta::Set(_) => None,
            };
            result.map(Value::Int32).ok_or_else(overflow)
        }
        Value::Int64(a) => {
            let b = operand.as_i64().ok_or_else(overflow)?;
            let result = match delta {
                FieldDelta::Increment(_) => a.checked_add(b),
                FieldDelta::Decrement(_) => a.checked_sub(b),
                FieldDelta::Multiply(_) => a.checked_mul(b),
                FieldDelta::Divide(_) => a.checked_div(b),
                FieldDelta::Set(_) => None,
            };
            result.map(Value::Int64).ok_or_else(overflow)
        }
        Value::Float32(_) | Value::Float64(_) => {
            let a = current.as_f64().ok_or_else(overflow)?;
            let b = operand.as_f64().ok_or_else(overflow)?;
            let result = match delta {
                FieldDelta::Increment(_) => a + b,
                FieldDelta::Decrement(_) => a - b,
                FieldDelta::Multiply(_) => a * b,
                FieldDelta::Divide(_) => a / b,
                FieldDelta::Set(_) => b,
            };
            Ok(match current {
                Value::Float32(_) => Value::Float32(result as f32),
                _ => Value::Float64(result),
            })
        }
        other => Err(StorageError::Backend(format!(
            "cannot apply arithmetic to {} value",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_delta() {
        assert_eq!(
            apply_delta(&Value::Int64(10), &FieldDelta::Increment(Value::Int64(5))).unwrap(),
            Value::Int64(15)
        );
        assert_eq!(
            apply_delta(&Value::Int32(10), &FieldDelta::Divide(Value::Int32(3))).unwrap(),
            Value::Int32(3)
        );
        assert_eq!(
            apply_delta(&Value::Float64(1.5), &FieldDelta::Multiply(Value::Float64(2.0))).unwrap(),
            Value::Float64(3.0)
        );
        assert_eq!(
            apply_delta(&Value::Null, &FieldDelta::Decrement(Value::Int32(1))).unwrap(),
            Value::Null
        );
        assert_eq!(
            apply_delta(&Value::Int32(1), &FieldDelta::Set(Value::Null)).unwrap(),
            Value::Null
        );
    }

    #[test]
    fn test_apply_delta_overflow() {
        let err = apply_delta(&Value::Int32(i32::MAX), &FieldDelta::Increment(Value::Int32(1)));
        assert!(matches!(err, Err(StorageError::Backend(_))));

        let err = apply_delta(&Value::String("a".into()), &FieldDelta::Increment(Value::Int32(1)));
        assert!(err.is_err());
    }
}
