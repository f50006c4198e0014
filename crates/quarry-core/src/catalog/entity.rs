//! Entity definitions.

use super::field::FieldDef;
use super::relation::RelationDef;
use serde::{Deserialize, Serialize};

/// An entity definition: identity, fields and outgoing relations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDef {
    /// Entity name (unique within the registry).
    pub name: String,
    /// Name of the primary identity field.
    pub identity_field: String,
    /// Field definitions in declaration order.
    pub fields: Vec<FieldDef>,
    /// Relations from this entity.
    #[serde(default)]
    pub relations: Vec<RelationDef>,
}

impl EntityDef {
    /// Create a new entity definition.
    pub fn new(name: impl Into<String>, identity_field: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            identity_field: identity_field.into(),
            fields: Vec::new(),
            relations: Vec::new(),
        }
    }

    /// Add a field to the entity.
    pub fn with_field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    /// Add multiple fields.
    pub fn with_fields(mut self, fields: impl IntoIterator<Item = FieldDef>) -> Self {
        self.fields.extend(fields);
        self
    }

    /// Add a relation from this entity.
    pub fn with_relation(mut self, relation: RelationDef) -> Self {
        self.relations.push(relation);
        self
    }

    /// Get a field by name.
    pub fn get_field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Get a relation by name.
    pub fn get_relation(&self, name: &str) -> Option<&RelationDef> {
        self.relations.iter().find(|r| r.name == name)
    }

    /// Get the identity field definition.
    pub fn get_identity_field(&self) -> Option<&FieldDef> {
        self.get_field(&self.identity_field)
    }

    /// All field names in declaration order.
    pub fn field_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{FieldType, ScalarType};

    #[test]
    fn test_entity_builder() {
        let entity = EntityDef::new("User", "id")
            .with_field(FieldDef::new("id", FieldType::scalar(ScalarType::Uuid)))
            .with_field(FieldDef::new("name", FieldType::scalar(ScalarType::String)))
            .with_field(FieldDef::optional(
                "email",
                FieldType::scalar(ScalarType::String),
            ))
            .with_relation(RelationDef::one_to_many("posts", "User", "id", "Post", "author_id"));

        assert_eq!(entity.name, "User");
        assert_eq!(entity.identity_field, "id");
        assert_eq!(entity.fields.len(), 3);
        assert_eq!(entity.field_names(), vec!["id", "name", "email"]);
        assert!(entity.get_relation("posts").is_some());
    }

    #[test]
    fn test_get_field() {
        let entity = EntityDef::new("User", "id")
            .with_field(FieldDef::new("id", FieldType::scalar(ScalarType::Uuid)))
            .with_field(FieldDef::new("name", FieldType::scalar(ScalarType::String)));

        assert!(entity.get_field("id").is_some());
        assert!(entity.get_field("name").is_some());
        assert!(entity.get_field("nonexistent").is_none());
        assert!(entity.get_identity_field().is_some());
    }
}
