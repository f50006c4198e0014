//! Relation definitions between entities.

use serde::{Deserialize, Serialize};

/// How many target records one source record relates to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    /// At most one related record.
    One,
    /// Any number of related records.
    Many,
}

/// Which side of a relation stores the foreign key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForeignKeySide {
    /// `from_field` on the source entity references `to_field` on the target.
    Source,
    /// `to_field` on the target entity references `from_field` on the source.
    Target,
}

/// Behavior when a referenced record is deleted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteBehavior {
    /// Prevent deletion if referencing records exist.
    #[default]
    Restrict,
    /// Delete referencing records.
    Cascade,
    /// Set the foreign key of referencing records to null.
    SetNull,
}

/// A named, directed relation from one entity to another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationDef {
    /// Relation name (unique within the source entity).
    pub name: String,
    /// Source entity name.
    pub from_entity: String,
    /// Target entity name.
    pub to_entity: String,
    /// Relation cardinality.
    pub cardinality: Cardinality,
    /// Join field on the source entity.
    pub from_field: String,
    /// Join field on the target entity.
    pub to_field: String,
    /// Side holding the foreign key.
    pub key_side: ForeignKeySide,
    /// Delete behavior for the records holding the key.
    #[serde(default)]
    pub on_delete: DeleteBehavior,
}

/// The foreign-key half of a relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey<'a> {
    /// Entity storing the key.
    pub holder: &'a str,
    /// Key field on the holder.
    pub key_field: &'a str,
    /// Referenced entity.
    pub referenced: &'a str,
    /// Referenced field (usually the identity).
    pub referenced_field: &'a str,
}

impl RelationDef {
    /// Create a relation to many target records holding a key to the source.
    ///
    /// `one_to_many("posts", "User", "id", "Post", "author_id")`
    pub fn one_to_many(
        name: impl Into<String>,
        from_entity: impl Into<String>,
        from_field: impl Into<String>,
        to_entity: impl Into<String>,
        to_field: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            from_entity: from_entity.into(),
            to_entity: to_entity.into(),
            cardinality: Cardinality::Many,
            from_field: from_field.into(),
            to_field: to_field.into(),
            key_side: ForeignKeySide::Target,
            on_delete: DeleteBehavior::Restrict,
        }
    }

    /// Create a relation from a key on the source to one target record.
    ///
    /// `many_to_one("author", "Post", "author_id", "User", "id")`
    pub fn many_to_one(
        name: impl Into<String>,
        from_entity: impl Into<String>,
        from_field: impl Into<String>,
        to_entity: impl Into<String>,
        to_field: impl Into<String>,
    ) -> Self {
        Self {
            cardinality: Cardinality::One,
            key_side: ForeignKeySide::Source,
            ..Self::one_to_many(name, from_entity, from_field, to_entity, to_field)
        }
    }

    /// Create a one-to-one relation with the key on the source.
    pub fn one_to_one(
        name: impl Into<String>,
        from_entity: impl Into<String>,
        from_field: impl Into<String>,
        to_entity: impl Into<String>,
        to_field: impl Into<String>,
    ) -> Self {
        Self::many_to_one(name, from_entity, from_field, to_entity, to_field)
    }

    /// Set the side holding the foreign key.
    pub fn with_foreign_key(mut self, side: ForeignKeySide) -> Self {
        self.key_side = side;
        self
    }

    /// Set delete behavior.
    pub fn with_on_delete(mut self, on_delete: DeleteBehavior) -> Self {
        self.on_delete = on_delete;
        self
    }

    /// Check if the relation yields many records.
    pub fn is_many(&self) -> bool {
        self.cardinality == Cardinality::Many
    }

    /// The foreign key this relation is backed by.
    pub fn foreign_key(&self) -> ForeignKey<'_> {
        match self.key_side {
            ForeignKeySide::Source => ForeignKey {
                holder: &self.from_entity,
                key_field: &self.from_field,
                referenced: &self.to_entity,
                referenced_field: &self.to_field,
            },
            ForeignKeySide::Target => ForeignKey {
                holder: &self.to_entity,
                key_field: &self.to_field,
                referenced: &self.from_entity,
                referenced_field: &self.from_field,
            },
        }
    }

    /// Get the inverse relation (swapping from/to).
    pub fn inverse(&self, name: impl Into<String>) -> Self {
        let (cardinality, key_side) = match self.key_side {
            ForeignKeySide::Source => (Cardinality::Many, ForeignKeySide::Target),
            ForeignKeySide::Target => (Cardinality::One, ForeignKeySide::Source),
        };
        Self {
            name: name.into(),
            from_entity: self.to_entity.clone(),
            to_entity: self.from_entity.clone(),
            cardinality,
            from_field: self.to_field.clone(),
            to_field: self.from_field.clone(),
            key_side,
            on_delete: self.on_delete,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_to_many_relation() {
        let rel = RelationDef::one_to_many("posts", "User", "id", "Post", "author_id")
            .with_on_delete(DeleteBehavior::Cascade);

        assert!(rel.is_many());
        assert_eq!(rel.on_delete, DeleteBehavior::Cascade);

        let fk = rel.foreign_key();
        assert_eq!(fk.holder, "Post");
        assert_eq!(fk.key_field, "author_id");
        assert_eq!(fk.referenced, "User");
        assert_eq!(fk.referenced_field, "id");
    }

    #[test]
    fn test_many_to_one_relation() {
        let rel = RelationDef::many_to_one("author", "Post", "author_id", "User", "id");

        assert!(!rel.is_many());
        assert_eq!(rel.key_side, ForeignKeySide::Source);
        assert_eq!(rel.foreign_key().holder, "Post");
        assert_eq!(rel.on_delete, DeleteBehavior::Restrict);
    }

    #[test]
    fn test_inverse_relation() {
        let rel = RelationDef::one_to_many("posts", "User", "id", "Post", "author_id");
        let inverse = rel.inverse("author");

        assert_eq!(inverse.from_entity, "Post");
        assert_eq!(inverse.to_entity, "User");
        assert_eq!(inverse.cardinality, Cardinality::One);
        assert_eq!(inverse.foreign_key(), rel.foreign_key());
    }
}
