//! Schema registry for the query engine.
//!
//! The catalog holds entity definitions: fields, their types and the
//! relations between entities.

mod entity;
mod field;
mod registry;
mod relation;
mod schema;
mod types;

pub use entity::EntityDef;
pub use field::{current_timestamp, DefaultValue, FieldDef};
pub use registry::{ForeignKeyRef, SchemaRegistry};
pub use relation::{Cardinality, DeleteBehavior, ForeignKey, ForeignKeySide, RelationDef};
pub use schema::SchemaBundle;
pub use types::{FieldType, ScalarType};
