//! Quarry request and result types.
//!
//! This crate defines the serializable intermediate representation consumed
//! and produced by the query engine: filter trees, read shapes, pagination
//! arguments, mutations, transaction plans and their results.
//!
//! # Modules
//!
//! - [`value`] - Runtime value types for literals and result rows
//! - [`query`] - Read request IR (filters, ordering, pagination, shapes)
//! - [`mutation`] - Write request IR and transaction plans
//! - [`result`] - Rows, record trees and mutation results
//! - [`error`] - Codec error types
//!
//! # Serialization
//!
//! Every type derives serde for JSON requests. [`Value`] and [`Row`] also
//! derive rkyv so storage backends can persist rows:
//!
//! ```ignore
//! use quarry_proto::{Row, Value};
//!
//! let row = Row::new().with("id", Value::Int64(1));
//! let bytes = row.to_bytes()?;
//! let decoded = Row::from_bytes(&bytes)?;
//! ```

pub mod error;
pub mod mutation;
pub mod query;
pub mod result;
pub mod value;

pub use error::Error;

// Re-export commonly used types at crate root
pub use mutation::{
    CreateInput, FieldDelta, FieldUpdate, FieldValue, Mutation, TransactionPlan, TransactionStep,
};
pub use query::{
    Condition, FilterExpr, OrderDirection, OrderSpec, PaginationArgs, Quantifier, ReadQuery,
    ReadShape, RelationRead,
};
pub use result::{MutationResult, ReadResult, RecordNode, Row, StepResult, TransactionResult};
pub use value::Value;

/// A request document: one read, one mutation or one transaction.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Request {
    Read(ReadQuery),
    Mutate(Mutation),
    Transaction(TransactionPlan),
}

impl Request {
    /// Decode a request from JSON text.
    pub fn from_json(text: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(text)?)
    }
}
