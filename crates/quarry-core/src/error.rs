//! Core error types.

use thiserror::Error;

/// Errors raised by the engine while resolving or executing requests.
#[derive(Debug, Error)]
pub enum Error {
    /// Entity is not registered.
    #[error("unknown entity: {0}")]
    UnknownEntity(String),

    /// Relation is not defined on the entity.
    #[error("unknown relation '{relation}' on entity {entity}")]
    UnknownRelation { entity: String, relation: String },

    /// Entity name registered twice.
    #[error("entity already registered: {0}")]
    DuplicateEntity(String),

    /// Registration attempted after the registry was sealed.
    #[error("schema registry is sealed")]
    RegistrySealed,

    /// Entity or relation definitions are inconsistent.
    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    /// Filter expression cannot be resolved against the entity.
    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    /// Pagination arguments are contradictory or out of range.
    #[error("invalid pagination: {0}")]
    InvalidPagination(String),

    /// Cursor token cannot be decoded or does not fit the read.
    #[error("invalid cursor: {0}")]
    InvalidCursor(String),

    /// Relation traversal nested too deeply.
    #[error("relation depth {depth} exceeds maximum {max}")]
    DepthExceeded { depth: usize, max: usize },

    /// Request data does not fit the schema.
    #[error("validation error: {0}")]
    Validation(String),

    /// A single-record mutation matched nothing.
    #[error("{entity} record not found: {id}")]
    NotFound { entity: String, id: String },

    /// Referential integrity would be broken.
    #[error("relation violation: {0}")]
    RelationViolation(String),

    /// A transaction step failed; all prior steps were rolled back.
    #[error("transaction aborted at step '{step}': {source}")]
    TransactionAborted {
        step: String,
        #[source]
        source: Box<Error>,
    },

    /// A value could not be serialized, for example into a cursor token.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Storage collaborator failure.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Fieldless classification of [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    UnknownEntity,
    UnknownRelation,
    DuplicateEntity,
    RegistrySealed,
    InvalidSchema,
    InvalidFilter,
    InvalidPagination,
    InvalidCursor,
    DepthExceeded,
    Validation,
    NotFound,
    RelationViolation,
    TransactionAborted,
    Serialization,
    Storage,
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::UnknownEntity(_) => ErrorKind::UnknownEntity,
            Error::UnknownRelation { .. } => ErrorKind::UnknownRelation,
            Error::DuplicateEntity(_) => ErrorKind::DuplicateEntity,
            Error::RegistrySealed => ErrorKind::RegistrySealed,
            Error::InvalidSchema(_) => ErrorKind::InvalidSchema,
            Error::InvalidFilter(_) => ErrorKind::InvalidFilter,
            Error::InvalidPagination(_) => ErrorKind::InvalidPagination,
            Error::InvalidCursor(_) => ErrorKind::InvalidCursor,
            Error::DepthExceeded { .. } => ErrorKind::DepthExceeded,
            Error::Validation(_) => ErrorKind::Validation,
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::RelationViolation(_) => ErrorKind::RelationViolation,
            Error::TransactionAborted { .. } => ErrorKind::TransactionAborted,
            Error::Serialization(_) => ErrorKind::Serialization,
            Error::Storage(_) => ErrorKind::Storage,
        }
    }

    /// For an aborted transaction, the error raised by the failing step.
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::TransactionAborted { source, .. } => source.root_cause(),
            other => other,
        }
    }

    pub(crate) fn unknown_relation(entity: &str, relation: &str) -> Self {
        Error::UnknownRelation {
            entity: entity.to_string(),
            relation: relation.to_string(),
        }
    }
}

/// Errors raised by storage backends.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Sled database error.
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    /// Row encoding or decoding failed.
    #[error("codec error: {0}")]
    Codec(#[from] quarry_proto::Error),

    /// A record with the same identity already exists.
    #[error("duplicate identity {key} for {entity}")]
    DuplicateKey { entity: String, key: String },

    /// The backend cannot carry out the request.
    #[error("{0}")]
    Backend(String),
}
