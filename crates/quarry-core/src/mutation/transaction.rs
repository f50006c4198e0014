//! Transaction coordination.
//!
//! A [`TransactionPlan`] is validated and every step planned before any
//! storage call. The steps then run in dependency order inside one write
//! scope, which commits only after the last step succeeds.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use super::executor::MutationExecutor;
use super::planner::{topological_order, MutationPlan, MutationPlanner};
use crate::catalog::SchemaRegistry;
use crate::config::EngineConfig;
use crate::error::Error;
use crate::storage::StorageBackend;
use quarry_proto::{StepResult, TransactionPlan, TransactionResult};

/// A transaction with every step validated and planned, in execution order.
#[derive(Debug, Clone)]
pub struct PlannedTransaction {
    pub steps: Vec<PlannedStep>,
}

/// One planned step.
#[derive(Debug, Clone)]
pub struct PlannedStep {
    pub label: String,
    pub plan: MutationPlan,
}

impl PlannedTransaction {
    /// Step labels in execution order.
    pub fn labels(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.label.as_str()).collect()
    }

    /// Run every step in one write scope.
    ///
    /// The first failing step rolls the scope back and is reported as
    /// [`Error::TransactionAborted`].
    pub async fn execute<S>(&self, storage: &S) -> Result<TransactionResult, Error>
    where
        S: StorageBackend + ?Sized,
    {
        let mut tx = storage.begin().await?;
        let mut results = Vec::with_capacity(self.steps.len());

        for step in &self.steps {
            let outcome = MutationExecutor::new(tx.as_mut()).execute(&step.plan).await;
            match outcome {
                Ok(result) => {
                    debug!(step = %step.label, affected = result.affected, "transaction step done");
                    results.push(StepResult {
                        label: step.label.clone(),
                        result,
                    });
                }
                Err(err) => {
                    warn!(step = %step.label, error = %err, "transaction rolled back");
                    if let Err(rollback_err) = tx.rollback().await {
                        warn!(error = %rollback_err, "rollback failed");
                    }
                    return Err(Error::TransactionAborted {
                        step: step.label.clone(),
                        source: Box::new(err),
                    });
                }
            }
        }

        tx.commit().await?;
        info!(steps = results.len(), "transaction committed");
        Ok(TransactionResult { steps: results })
    }
}

/// Validates and plans transactions.
pub struct TransactionCoordinator<'a> {
    registry: &'a SchemaRegistry,
    config: &'a EngineConfig,
}

impl<'a> TransactionCoordinator<'a> {
    /// Create a coordinator.
    pub fn new(registry: &'a SchemaRegistry, config: &'a EngineConfig) -> Self {
        Self { registry, config }
    }

    /// Validate labels and dependencies and plan every step.
    pub fn plan(&self, plan: &TransactionPlan) -> Result<PlannedTransaction, Error> {
        let mut positions: HashMap<&str, usize> = HashMap::with_capacity(plan.len());
        for (position, step) in plan.steps.iter().enumerate() {
            if step.label.is_empty() {
                return Err(Error::Validation(format!(
                    "transaction step {position} has an empty label"
                )));
            }
            if positions.insert(step.label.as_str(), position).is_some() {
                return Err(Error::Validation(format!(
                    "duplicate transaction step label '{}'",
                    step.label
                )));
            }
        }

        let mut edges = Vec::new();
        for (position, step) in plan.steps.iter().enumerate() {
            for dependency in &step.depends_on {
                let before = positions.get(dependency.as_str()).ok_or_else(|| {
                    Error::Validation(format!(
                        "step '{}' depends on unknown step '{dependency}'",
                        step.label
                    ))
                })?;
                if *before == position {
                    return Err(Error::Validation(format!(
                        "step '{}' depends on itself",
                        step.label
                    )));
                }
                edges.push((*before, position));
            }
        }
        let order = topological_order(plan.len(), &edges).map_err(|_| {
            Error::Validation("transaction step dependencies form a cycle".to_string())
        })?;

        let planner = MutationPlanner::new(self.registry, self.config);
        let steps = order
            .into_iter()
            .map(|position| {
                let step = &plan.steps[position];
                Ok(PlannedStep {
                    label: step.label.clone(),
                    plan: planner.plan(&step.mutation)?,
                })
            })
            .collect::<Result<Vec<_>, Error>>()?;

        debug!(steps = steps.len(), "planned transaction");
        Ok(PlannedTransaction { steps })
    }
}
