//! Schema bundle - a serializable set of entity definitions.

use super::EntityDef;
use serde::{Deserialize, Serialize};

/// A complete schema as loaded from a schema source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaBundle {
    /// Entity definitions in registration order.
    pub entities: Vec<EntityDef>,
}

impl SchemaBundle {
    /// Create a bundle from entity definitions.
    pub fn new(entities: Vec<EntityDef>) -> Self {
        Self { entities }
    }

    /// Add an entity to the bundle.
    pub fn with_entity(mut self, entity: EntityDef) -> Self {
        self.entities.push(entity);
        self
    }

    /// Get an entity by name.
    pub fn get_entity(&self, name: &str) -> Option<&EntityDef> {
        self.entities.iter().find(|e| e.name == name)
    }

    /// Parse a bundle from JSON.
    pub fn from_json(text: &str) -> Result<Self, quarry_proto::Error> {
        Ok(serde_json::from_str(text)?)
    }

    /// Render the bundle as pretty JSON.
    pub fn to_json(&self) -> Result<String, quarry_proto::Error> {
        serde_json::to_string_pretty(self)
            .map_err(|e| quarry_proto::Error::Serialization(e.to_string()))
    }
}
