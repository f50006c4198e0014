//! Quarry Core - schema registry, planners and execution.
//!
//! This crate turns declarative requests from [`quarry_proto`] into
//! validated plans and runs them against a pluggable storage backend.
//!
//! # Modules
//!
//! - [`catalog`] - Entity, field and relation definitions and the registry
//! - [`query`] - Filter resolution, pagination and relation traversal
//! - [`mutation`] - Mutation planning, execution and transactions
//! - [`storage`] - Storage contract plus in-memory and sled reference stores
//! - [`engine`] - The [`Engine`] façade

pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod mutation;
pub mod query;
pub mod storage;

pub use catalog::{
    Cardinality, DefaultValue, DeleteBehavior, EntityDef, FieldDef, FieldType, ForeignKeySide,
    RelationDef, ScalarType, SchemaBundle, SchemaRegistry,
};
pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{Error, ErrorKind, StorageError};
pub use mutation::{MutationPlan, PlannedTransaction};
pub use query::FetchPlan;
pub use storage::{
    MemoryStore, SledStore, SledStoreConfig, StorageBackend, StorageTransaction,
};

/// Re-export protocol types.
pub use quarry_proto as proto;
