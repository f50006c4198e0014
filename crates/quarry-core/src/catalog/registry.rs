//! Schema registry: the set of entity definitions requests resolve against.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use super::relation::DeleteBehavior;
use super::{DefaultValue, EntityDef, RelationDef, SchemaBundle};
use crate::error::Error;

/// A foreign key pointing at an entity, as seen from the referenced side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyRef {
    /// Entity storing the key.
    pub holder: String,
    /// Key field on the holder.
    pub key_field: String,
    /// Referenced field on the referenced entity.
    pub referenced_field: String,
    /// What happens to holders when the referenced record is deleted.
    pub on_delete: DeleteBehavior,
}

/// Registry of entity definitions.
///
/// Entities are registered at startup and the registry is then sealed; after
/// sealing it is read-only and shared by concurrent requests.
pub struct SchemaRegistry {
    entities: RwLock<HashMap<String, Arc<EntityDef>>>,
    sealed: AtomicBool,
}

impl SchemaRegistry {
    /// Create an empty, unsealed registry.
    pub fn new() -> Self {
        Self {
            entities: RwLock::new(HashMap::new()),
            sealed: AtomicBool::new(false),
        }
    }

    /// Create a registry holding every entity of a bundle (unsealed).
    pub fn from_bundle(bundle: SchemaBundle) -> Result<Self, Error> {
        let registry = Self::new();
        for entity in bundle.entities {
            registry.register(entity)?;
        }
        Ok(registry)
    }

    /// Register an entity definition.
    pub fn register(&self, mut entity: EntityDef) -> Result<(), Error> {
        if self.is_sealed() {
            return Err(Error::RegistrySealed);
        }
        validate_entity(&entity)?;
        type_defaults(&mut entity)?;

        let mut entities = self.entities.write();
        if entities.contains_key(&entity.name) {
            return Err(Error::DuplicateEntity(entity.name));
        }
        debug!(
            entity = %entity.name,
            fields = entity.fields.len(),
            relations = entity.relations.len(),
            "registered entity"
        );
        entities.insert(entity.name.clone(), Arc::new(entity));
        Ok(())
    }

    /// Look up an entity definition.
    pub fn resolve(&self, name: &str) -> Result<Arc<EntityDef>, Error> {
        self.entities
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownEntity(name.to_string()))
    }

    /// Look up a relation on an entity.
    pub fn resolve_relation(&self, entity: &str, relation: &str) -> Result<RelationDef, Error> {
        self.resolve(entity)?
            .get_relation(relation)
            .cloned()
            .ok_or_else(|| Error::unknown_relation(entity, relation))
    }

    /// Close the registry to further registration.
    ///
    /// Fails if a relation targets an unregistered entity or names a join
    /// field missing on either side. Sealing twice is a no-op.
    pub fn seal(&self) -> Result<(), Error> {
        if self.is_sealed() {
            return Ok(());
        }
        let entities = self.entities.read();
        for entity in entities.values() {
            for relation in &entity.relations {
                validate_relation(&entities, entity, relation)?;
            }
        }
        self.sealed.store(true, Ordering::SeqCst);
        debug!(entities = entities.len(), "schema registry sealed");
        Ok(())
    }

    /// Check if the registry has been sealed.
    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::SeqCst)
    }

    /// Registered entity names, sorted.
    pub fn entity_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entities.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Every foreign key that references `entity`.
    ///
    /// A relation and its inverse describe the same key; it is reported once.
    /// When the two sides disagree on the delete behavior, the side declaring
    /// something other than `Restrict` wins.
    pub fn foreign_keys_referencing(&self, entity: &str) -> Vec<ForeignKeyRef> {
        let entities = self.entities.read();
        let mut names: Vec<&String> = entities.keys().collect();
        names.sort();

        let mut found: Vec<ForeignKeyRef> = Vec::new();
        for name in names {
            for relation in &entities[name].relations {
                let fk = relation.foreign_key();
                if fk.referenced != entity {
                    continue;
                }
                let existing = found
                    .iter_mut()
                    .find(|r| r.holder == fk.holder && r.key_field == fk.key_field);
                match existing {
                    Some(existing) => {
                        if existing.on_delete == DeleteBehavior::Restrict {
                            existing.on_delete = relation.on_delete;
                        }
                    }
                    None => found.push(ForeignKeyRef {
                        holder: fk.holder.to_string(),
                        key_field: fk.key_field.to_string(),
                        referenced_field: fk.referenced_field.to_string(),
                        on_delete: relation.on_delete,
                    }),
                }
            }
        }
        found
    }

    /// Every relation (from any entity) whose foreign key lives on `holder`.
    pub fn keys_held_by(&self, holder: &str) -> Vec<RelationDef> {
        let entities = self.entities.read();
        let mut seen = HashSet::new();
        let mut names: Vec<&String> = entities.keys().collect();
        names.sort();

        let mut held = Vec::new();
        for name in names {
            for relation in &entities[name].relations {
                let fk = relation.foreign_key();
                if fk.holder == holder && seen.insert(fk.key_field.to_string()) {
                    held.push(relation.clone());
                }
            }
        }
        held
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_entity(entity: &EntityDef) -> Result<(), Error> {
    let invalid = |msg: String| Error::InvalidSchema(format!("{}: {msg}", entity.name));

    let mut names = HashSet::new();
    for field in &entity.fields {
        if !names.insert(field.name.as_str()) {
            return Err(invalid(format!("duplicate field '{}'", field.name)));
        }
        if let Some(DefaultValue::Value(value)) = &field.default {
            field.coerce(value).map_err(|e| invalid(format!("bad default: {e}")))?;
        }
    }

    match entity.get_identity_field() {
        None => {
            return Err(invalid(format!(
                "identity field '{}' is not declared",
                entity.identity_field
            )))
        }
        Some(identity) if identity.nullable => {
            return Err(invalid(format!(
                "identity field '{}' cannot be nullable",
                identity.name
            )))
        }
        Some(_) => {}
    }

    let mut relation_names = HashSet::new();
    for relation in &entity.relations {
        if !relation_names.insert(relation.name.as_str()) {
            return Err(invalid(format!("duplicate relation '{}'", relation.name)));
        }
        if relation.from_entity != entity.name {
            return Err(invalid(format!(
                "relation '{}' starts at {}",
                relation.name, relation.from_entity
            )));
        }
        if relation.is_many() && relation.key_side == super::ForeignKeySide::Source {
            return Err(invalid(format!(
                "relation '{}' has cardinality many but holds the key on the source",
                relation.name
            )));
        }
        if entity.get_field(&relation.from_field).is_none() {
            return Err(invalid(format!(
                "relation '{}' joins on unknown field '{}'",
                relation.name, relation.from_field
            )));
        }
    }
    Ok(())
}

/// Store literal defaults in their field's declared type.
fn type_defaults(entity: &mut EntityDef) -> Result<(), Error> {
    for field in &mut entity.fields {
        let typed = match &field.default {
            Some(DefaultValue::Value(value)) => field.coerce(value).map_err(|e| {
                Error::InvalidSchema(format!("{}: bad default: {e}", entity.name))
            })?,
            _ => continue,
        };
        field.default = Some(DefaultValue::Value(typed));
    }
    Ok(())
}

fn validate_relation(
    entities: &HashMap<String, Arc<EntityDef>>,
    entity: &EntityDef,
    relation: &RelationDef,
) -> Result<(), Error> {
    let target = entities.get(&relation.to_entity).ok_or_else(|| {
        Error::InvalidSchema(format!(
            "{}.{} targets unknown entity {}",
            entity.name, relation.name, relation.to_entity
        ))
    })?;
    let to_field = target.get_field(&relation.to_field).ok_or_else(|| {
        Error::InvalidSchema(format!(
            "{}.{} joins on unknown field {}.{}",
            entity.name, relation.name, relation.to_entity, relation.to_field
        ))
    })?;
    // validate_entity already checked the source side exists.
    if let Some(from_field) = entity.get_field(&relation.from_field) {
        if !from_field.field_type.is_key_compatible(&to_field.field_type) {
            return Err(Error::InvalidSchema(format!(
                "{}.{} joins {} to {}",
                entity.name,
                relation.name,
                from_field.field_type.name(),
                to_field.field_type.name()
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::fixtures::{blog_entities, blog_registry};
    use crate::catalog::{FieldDef, FieldType, ForeignKeySide, ScalarType};

    #[test]
    fn test_register_and_resolve() {
        let registry = blog_registry();

        let user = registry.resolve("User").unwrap();
        assert_eq!(user.identity_field, "id");
        assert!(matches!(
            registry.resolve("Missing"),
            Err(Error::UnknownEntity(name)) if name == "Missing"
        ));
    }

    #[test]
    fn test_resolve_relation() {
        let registry = blog_registry();

        let posts = registry.resolve_relation("User", "posts").unwrap();
        assert_eq!(posts.to_entity, "Post");
        assert!(matches!(
            registry.resolve_relation("User", "friends"),
            Err(Error::UnknownRelation { .. })
        ));
        assert!(matches!(
            registry.resolve_relation("Ghost", "posts"),
            Err(Error::UnknownEntity(_))
        ));
    }

    #[test]
    fn test_duplicate_entity() {
        let registry = SchemaRegistry::new();
        let entity = EntityDef::new("Tag", "id")
            .with_field(FieldDef::new("id", FieldType::scalar(ScalarType::Int64)));

        registry.register(entity.clone()).unwrap();
        assert!(matches!(
            registry.register(entity),
            Err(Error::DuplicateEntity(name)) if name == "Tag"
        ));
    }

    #[test]
    fn test_register_after_seal() {
        let registry = blog_registry();
        let entity = EntityDef::new("Tag", "id")
            .with_field(FieldDef::new("id", FieldType::scalar(ScalarType::Int64)));

        assert!(registry.is_sealed());
        assert!(matches!(registry.register(entity), Err(Error::RegistrySealed)));
    }

    #[test]
    fn test_invalid_entities() {
        let registry = SchemaRegistry::new();

        let no_identity = EntityDef::new("A", "id")
            .with_field(FieldDef::new("name", FieldType::scalar(ScalarType::String)));
        assert!(matches!(registry.register(no_identity), Err(Error::InvalidSchema(_))));

        let nullable_identity = EntityDef::new("B", "id")
            .with_field(FieldDef::optional("id", FieldType::scalar(ScalarType::Int64)));
        assert!(matches!(registry.register(nullable_identity), Err(Error::InvalidSchema(_))));

        let duplicate_field = EntityDef::new("C", "id")
            .with_field(FieldDef::new("id", FieldType::scalar(ScalarType::Int64)))
            .with_field(FieldDef::new("id", FieldType::scalar(ScalarType::Int64)));
        assert!(matches!(registry.register(duplicate_field), Err(Error::InvalidSchema(_))));

        let many_on_source = EntityDef::new("D", "id")
            .with_field(FieldDef::new("id", FieldType::scalar(ScalarType::Int64)))
            .with_relation(
                RelationDef::one_to_many("items", "D", "id", "Item", "d_id")
                    .with_foreign_key(ForeignKeySide::Source),
            );
        assert!(matches!(registry.register(many_on_source), Err(Error::InvalidSchema(_))));

        assert!(registry.entity_names().is_empty());
    }

    #[test]
    fn test_seal_rejects_dangling_target() {
        let registry = SchemaRegistry::new();
        registry
            .register(
                EntityDef::new("Post", "id")
                    .with_field(FieldDef::new("id", FieldType::scalar(ScalarType::Int64)))
                    .with_field(FieldDef::new("author_id", FieldType::scalar(ScalarType::Int64)))
                    .with_relation(RelationDef::many_to_one(
                        "author", "Post", "author_id", "User", "id",
                    )),
            )
            .unwrap();

        assert!(matches!(registry.seal(), Err(Error::InvalidSchema(_))));
        assert!(!registry.is_sealed());
    }

    #[test]
    fn test_foreign_keys_referencing() {
        let registry = blog_registry();

        let user_refs = registry.foreign_keys_referencing("User");
        assert_eq!(user_refs.len(), 2);

        let posts = user_refs.iter().find(|r| r.holder == "Post").unwrap();
        assert_eq!(posts.key_field, "author_id");
        assert_eq!(posts.on_delete, DeleteBehavior::Cascade);

        let edits = user_refs.iter().find(|r| r.holder == "Comment").unwrap();
        assert_eq!(edits.key_field, "editor_id");
        assert_eq!(edits.on_delete, DeleteBehavior::SetNull);

        let post_refs = registry.foreign_keys_referencing("Post");
        assert_eq!(post_refs.len(), 1);
        assert_eq!(post_refs[0].on_delete, DeleteBehavior::Restrict);
    }

    #[test]
    fn test_keys_held_by() {
        let registry = blog_registry();
        let held = registry.keys_held_by("Comment");
        let mut fields: Vec<&str> = held.iter().map(|r| r.foreign_key().key_field).collect();
        fields.sort();
        assert_eq!(fields, vec!["editor_id", "post_id"]);
    }

    #[test]
    fn test_from_bundle() {
        let bundle = SchemaBundle::new(blog_entities());
        let registry = SchemaRegistry::from_bundle(bundle).unwrap();
        registry.seal().unwrap();
        assert_eq!(registry.entity_names(), vec!["Comment", "Post", "User"]);
    }
}
