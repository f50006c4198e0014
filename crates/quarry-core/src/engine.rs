//! Execution façade.
//!
//! [`Engine`] ties the schema registry, the planners and a storage backend
//! together. Every request is fully resolved before the first storage call;
//! reads run against committed state and writes run in atomic scopes.

use std::sync::Arc;

use tracing::instrument;

use crate::catalog::SchemaRegistry;
use crate::config::EngineConfig;
use crate::error::Error;
use crate::mutation::{execute_atomic, MutationPlan, MutationPlanner, PlannedTransaction, TransactionCoordinator};
use crate::query::{FetchPlan, QueryExecutor, TraversalPlanner};
use crate::storage::StorageBackend;
use quarry_proto::{
    FilterExpr, Mutation, MutationResult, PaginationArgs, ReadQuery, ReadResult, ReadShape,
    TransactionPlan, TransactionResult,
};

/// Declarative query and mutation engine over a storage backend.
pub struct Engine<S: StorageBackend> {
    registry: Arc<SchemaRegistry>,
    storage: S,
    config: EngineConfig,
}

impl<S: StorageBackend> Engine<S> {
    /// Create an engine with the default configuration.
    pub fn new(registry: Arc<SchemaRegistry>, storage: S) -> Result<Self, Error> {
        Self::with_config(registry, storage, EngineConfig::default())
    }

    /// Create an engine, sealing the registry if the configuration asks for it.
    pub fn with_config(
        registry: Arc<SchemaRegistry>,
        storage: S,
        config: EngineConfig,
    ) -> Result<Self, Error> {
        if config.auto_seal {
            registry.seal()?;
        }
        Ok(Self {
            registry,
            storage,
            config,
        })
    }

    /// The schema registry.
    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// The storage backend.
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// The engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Read records of an entity.
    pub async fn read(
        &self,
        entity: &str,
        filter: Option<FilterExpr>,
        pagination: Option<PaginationArgs>,
        shape: Option<ReadShape>,
    ) -> Result<ReadResult, Error> {
        let query = ReadQuery {
            entity: entity.to_string(),
            filter,
            order_by: Vec::new(),
            pagination,
            shape: shape.unwrap_or_default(),
        };
        self.read_query(&query).await
    }

    /// Read records with full control over ordering.
    #[instrument(skip_all, fields(entity = %query.entity))]
    pub async fn read_query(&self, query: &ReadQuery) -> Result<ReadResult, Error> {
        let plan = self.plan_read(query)?;
        QueryExecutor::new(&self.storage).execute(&plan).await
    }

    /// Plan a read without executing it.
    pub fn plan_read(&self, query: &ReadQuery) -> Result<FetchPlan, Error> {
        TraversalPlanner::new(&self.registry, &self.config).plan(query)
    }

    /// Apply one mutation atomically.
    #[instrument(skip_all, fields(entity = %mutation.entity(), kind = mutation.kind()))]
    pub async fn mutate(&self, mutation: &Mutation) -> Result<MutationResult, Error> {
        let plan = self.plan_mutation(mutation)?;
        execute_atomic(&self.storage, &plan).await
    }

    /// Plan a mutation without executing it.
    pub fn plan_mutation(&self, mutation: &Mutation) -> Result<MutationPlan, Error> {
        MutationPlanner::new(&self.registry, &self.config).plan(mutation)
    }

    /// Run a multi-step transaction.
    #[instrument(skip_all, fields(steps = plan.len()))]
    pub async fn run_transaction(&self, plan: &TransactionPlan) -> Result<TransactionResult, Error> {
        let planned = self.plan_transaction(plan)?;
        planned.execute(&self.storage).await
    }

    /// Validate and plan a transaction without executing it.
    pub fn plan_transaction(&self, plan: &TransactionPlan) -> Result<PlannedTransaction, Error> {
        TransactionCoordinator::new(&self.registry, &self.config).plan(plan)
    }
}
