//! Mutation plan execution inside a storage transaction scope.

use tracing::{debug, warn};

use super::planner::{InsertStep, MutationPlan, Target, WriteStep};
use crate::error::Error;
use crate::query::PredicatePlan;
use crate::storage::{FetchRequest, KeyFilter, StorageBackend, StorageTransaction, StorageWrite};
use quarry_proto::{MutationResult, Row};

/// Runs mutation plans against an open write scope.
pub struct MutationExecutor<'t> {
    tx: &'t mut dyn StorageTransaction,
}

impl<'t> MutationExecutor<'t> {
    /// Create an executor over a write scope.
    pub fn new(tx: &'t mut dyn StorageTransaction) -> Self {
        Self { tx }
    }

    /// Execute every step of a plan. The scope is left open either way.
    pub async fn execute(&mut self, plan: &MutationPlan) -> Result<MutationResult, Error> {
        let mut created: Vec<Option<Row>> = vec![None; plan.created];
        let mut result = MutationResult::default();

        for step in &plan.steps {
            match step {
                WriteStep::Insert(insert) => {
                    let row = self.insert(insert, &created).await?;
                    result.affected += 1;
                    if let Some(slot) = created.get_mut(insert.node) {
                        *slot = Some(row);
                    }
                }
                WriteStep::RequireReference {
                    entity,
                    field,
                    value,
                } => {
                    let request = FetchRequest::new(entity.clone(), PredicatePlan::always())
                        .with_key_filter(KeyFilter {
                            field: field.clone(),
                            values: vec![value.clone()],
                        });
                    if self.tx.execute_read(&request).await?.is_empty() {
                        return Err(Error::RelationViolation(format!(
                            "no {entity} record with {field} = {value}"
                        )));
                    }
                }
                WriteStep::RequireAbsent {
                    entity,
                    predicate,
                    reason,
                } => {
                    let request = FetchRequest::new(entity.clone(), predicate.clone());
                    let found = self.tx.execute_read(&request).await?.len();
                    if found > 0 {
                        return Err(Error::RelationViolation(format!("{reason} ({found} found)")));
                    }
                }
                WriteStep::CascadeLimit {
                    entity,
                    predicate,
                    depth,
                    max,
                } => {
                    let request = FetchRequest::new(entity.clone(), predicate.clone());
                    if !self.tx.execute_read(&request).await?.is_empty() {
                        warn!(entity = %entity, depth, max, "cascade exceeds depth limit");
                        return Err(Error::DepthExceeded {
                            depth: *depth,
                            max: *max,
                        });
                    }
                }
                WriteStep::Update {
                    entity,
                    predicate,
                    assignments,
                    target,
                } => {
                    let write = StorageWrite::Update {
                        entity: entity.clone(),
                        predicate: predicate.clone(),
                        assignments: assignments.clone(),
                    };
                    let affected = self.tx.execute_mutation(&write).await?.affected;
                    tally(&mut result, entity, target, affected)?;
                }
                WriteStep::Delete {
                    entity,
                    predicate,
                    target,
                } => {
                    let write = StorageWrite::Delete {
                        entity: entity.clone(),
                        predicate: predicate.clone(),
                    };
                    let affected = self.tx.execute_mutation(&write).await?.affected;
                    tally(&mut result, entity, target, affected)?;
                }
            }
        }

        let mut ids = vec![None; plan.created];
        for insert in plan.inserts() {
            let id = created
                .get(insert.node)
                .and_then(Option::as_ref)
                .and_then(|row| row.get(&insert.identity_field));
            if let (Some(slot), Some(id)) = (ids.get_mut(insert.node), id) {
                *slot = Some(id.clone());
            }
        }
        result.generated_ids = ids.into_iter().flatten().collect();

        debug!(
            entity = %plan.entity,
            kind = plan.kind,
            affected = result.affected,
            cascaded = result.cascaded,
            "executed mutation"
        );
        Ok(result)
    }

    async fn insert(&mut self, insert: &InsertStep, created: &[Option<Row>]) -> Result<Row, Error> {
        let mut row = insert.values.clone();
        for binding in &insert.bindings {
            let value = created
                .get(binding.source)
                .and_then(Option::as_ref)
                .and_then(|source| source.get(&binding.source_field))
                .filter(|value| !value.is_null())
                .cloned()
                .ok_or_else(|| {
                    Error::Validation(format!(
                        "{}.{} has no related value to bind",
                        insert.entity, binding.field
                    ))
                })?;
            row.set(binding.field.clone(), value);
        }
        for field in &insert.deferred_defaults {
            if let Some(default) = &field.default {
                row.set(field.name.clone(), default.evaluate());
            }
        }

        let write = StorageWrite::Insert {
            entity: insert.entity.clone(),
            identity_field: insert.identity_field.clone(),
            identity: insert.identity,
            values: row.clone(),
        };
        let outcome = self.tx.execute_mutation(&write).await?;
        if let Some(id) = outcome.generated_ids.into_iter().next() {
            row.set(insert.identity_field.clone(), id);
        }
        Ok(row)
    }
}

fn tally(result: &mut MutationResult, entity: &str, target: &Target, affected: u64) -> Result<(), Error> {
    match target {
        Target::One { id } if affected == 0 => Err(Error::NotFound {
            entity: entity.to_string(),
            id: id.clone(),
        }),
        Target::One { .. } | Target::Many => {
            result.affected += affected;
            Ok(())
        }
        Target::Cascade => {
            result.cascaded += affected;
            Ok(())
        }
    }
}

/// Execute one plan in its own write scope, committing only on success.
pub async fn execute_atomic<S>(storage: &S, plan: &MutationPlan) -> Result<MutationResult, Error>
where
    S: StorageBackend + ?Sized,
{
    let mut tx = storage.begin().await?;
    let outcome = MutationExecutor::new(tx.as_mut()).execute(plan).await;
    match outcome {
        Ok(result) => {
            tx.commit().await?;
            Ok(result)
        }
        Err(err) => {
            warn!(entity = %plan.entity, kind = plan.kind, error = %err, "mutation rolled back");
            if let Err(rollback_err) = tx.rollback().await {
                warn!(error = %rollback_err, "rollback failed");
            }
            Err(err)
        }
    }
}
