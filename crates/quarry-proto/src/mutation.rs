//! Mutation IR types for write operations.

use std::collections::BTreeMap;

use crate::query::FilterExpr;
use crate::value::Value;
use serde::{Deserialize, Serialize};

/// A single write request against one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mutation {
    /// Create a record, optionally with nested related records.
    Create {
        /// Entity type to create.
        entity: String,
        /// Field values and nested creates.
        input: CreateInput,
    },
    /// Update one record by identity.
    Update {
        /// Entity type to update.
        entity: String,
        /// Identity value of the record.
        id: Value,
        /// Field changes.
        data: Vec<FieldUpdate>,
    },
    /// Delete one record by identity.
    Delete {
        /// Entity type to delete from.
        entity: String,
        /// Identity value of the record.
        id: Value,
    },
    /// Update every record matching a filter.
    UpdateMany {
        /// Entity type to update.
        entity: String,
        /// Records to update.
        filter: FilterExpr,
        /// Field changes.
        data: Vec<FieldUpdate>,
    },
    /// Delete every record matching a filter.
    DeleteMany {
        /// Entity type to delete from.
        entity: String,
        /// Records to delete.
        filter: FilterExpr,
    },
}

impl Mutation {
    /// Create a create mutation.
    pub fn create(entity: impl Into<String>, input: CreateInput) -> Self {
        Mutation::Create {
            entity: entity.into(),
            input,
        }
    }

    /// Create an update-by-id mutation.
    pub fn update(entity: impl Into<String>, id: impl Into<Value>, data: Vec<FieldUpdate>) -> Self {
        Mutation::Update {
            entity: entity.into(),
            id: id.into(),
            data,
        }
    }

    /// Create a delete-by-id mutation.
    pub fn delete(entity: impl Into<String>, id: impl Into<Value>) -> Self {
        Mutation::Delete {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Create a batch update mutation.
    pub fn update_many(
        entity: impl Into<String>,
        filter: FilterExpr,
        data: Vec<FieldUpdate>,
    ) -> Self {
        Mutation::UpdateMany {
            entity: entity.into(),
            filter,
            data,
        }
    }

    /// Create a batch delete mutation.
    pub fn delete_many(entity: impl Into<String>, filter: FilterExpr) -> Self {
        Mutation::DeleteMany {
            entity: entity.into(),
            filter,
        }
    }

    /// Get the entity type this mutation operates on.
    pub fn entity(&self) -> &str {
        match self {
            Mutation::Create { entity, .. }
            | Mutation::Update { entity, .. }
            | Mutation::Delete { entity, .. }
            | Mutation::UpdateMany { entity, .. }
            | Mutation::DeleteMany { entity, .. } => entity,
        }
    }

    /// Short operation name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Mutation::Create { .. } => "create",
            Mutation::Update { .. } => "update",
            Mutation::Delete { .. } => "delete",
            Mutation::UpdateMany { .. } => "update_many",
            Mutation::DeleteMany { .. } => "delete_many",
        }
    }
}

/// Input for a create: field values plus nested creates keyed by relation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateInput {
    /// Field values for the new record.
    #[serde(default)]
    pub data: Vec<FieldValue>,
    /// Related records to create alongside, keyed by relation name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub nested: BTreeMap<String, Vec<CreateInput>>,
}

impl CreateInput {
    /// Create an input from field values.
    pub fn new(data: Vec<FieldValue>) -> Self {
        Self {
            data,
            nested: BTreeMap::new(),
        }
    }

    /// Add a nested create under a relation.
    pub fn with_nested(mut self, relation: impl Into<String>, input: CreateInput) -> Self {
        self.nested.entry(relation.into()).or_default().push(input);
        self
    }

    /// Total number of records this input creates.
    pub fn record_count(&self) -> usize {
        1 + self
            .nested
            .values()
            .flatten()
            .map(CreateInput::record_count)
            .sum::<usize>()
    }
}

/// A field name and value pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldValue {
    /// Field name.
    pub field: String,
    /// Field value.
    pub value: Value,
}

impl FieldValue {
    /// Create a new field-value pair.
    pub fn new(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }
}

/// A change to one field in an update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldUpdate {
    /// Field name.
    pub field: String,
    /// How the field changes.
    pub delta: FieldDelta,
}

impl FieldUpdate {
    /// Replace the field value.
    pub fn set(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, FieldDelta::Set(value.into()))
    }

    /// Add to a numeric field.
    pub fn increment(field: impl Into<String>, by: impl Into<Value>) -> Self {
        Self::new(field, FieldDelta::Increment(by.into()))
    }

    /// Subtract from a numeric field.
    pub fn decrement(field: impl Into<String>, by: impl Into<Value>) -> Self {
        Self::new(field, FieldDelta::Decrement(by.into()))
    }

    /// Create a field update with an explicit delta.
    pub fn new(field: impl Into<String>, delta: FieldDelta) -> Self {
        Self {
            field: field.into(),
            delta,
        }
    }
}

/// Update operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldDelta {
    Set(Value),
    Increment(Value),
    Decrement(Value),
    Multiply(Value),
    Divide(Value),
}

impl FieldDelta {
    /// The operand carried by this delta.
    pub fn operand(&self) -> &Value {
        match self {
            FieldDelta::Set(v)
            | FieldDelta::Increment(v)
            | FieldDelta::Decrement(v)
            | FieldDelta::Multiply(v)
            | FieldDelta::Divide(v) => v,
        }
    }

    /// Check if this delta is arithmetic rather than a plain set.
    pub fn is_arithmetic(&self) -> bool {
        !matches!(self, FieldDelta::Set(_))
    }
}

/// Mutations grouped into one atomic unit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionPlan {
    /// Labelled steps in declared order.
    pub steps: Vec<TransactionStep>,
}

impl TransactionPlan {
    /// Create an empty plan.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step with no dependencies.
    pub fn step(self, label: impl Into<String>, mutation: Mutation) -> Self {
        self.step_after(label, mutation, Vec::<String>::new())
    }

    /// Append a step that runs after the given labels.
    pub fn step_after<I, S>(mut self, label: impl Into<String>, mutation: Mutation, depends_on: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.steps.push(TransactionStep {
            label: label.into(),
            mutation,
            depends_on: depends_on.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// Get the number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Check if the plan has no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// One labelled step in a transaction plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionStep {
    /// Unique label within the plan.
    pub label: String,
    /// The mutation to run.
    pub mutation: Mutation,
    /// Labels that must run before this step.
    #[serde(default)]
    pub depends_on: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mutation_entity() {
        let create = Mutation::create(
            "User",
            CreateInput::new(vec![FieldValue::new("name", "Alice")]),
        );
        let delete = Mutation::delete_many("Post", FilterExpr::eq("published", false));

        assert_eq!(create.entity(), "User");
        assert_eq!(create.kind(), "create");
        assert_eq!(delete.entity(), "Post");
        assert_eq!(delete.kind(), "delete_many");
    }

    #[test]
    fn test_nested_record_count() {
        let input = CreateInput::new(vec![FieldValue::new("email", "a@x")])
            .with_nested("posts", CreateInput::new(vec![FieldValue::new("title", "one")]))
            .with_nested(
                "posts",
                CreateInput::new(vec![FieldValue::new("title", "two")]).with_nested(
                    "comments",
                    CreateInput::new(vec![FieldValue::new("body", "hi")]),
                ),
            );

        assert_eq!(input.record_count(), 4);
        assert_eq!(input.nested["posts"].len(), 2);
    }

    #[test]
    fn test_transaction_plan_builder() {
        let plan = TransactionPlan::new()
            .step("a", Mutation::delete("User", 1))
            .step_after("b", Mutation::delete("User", 2), ["a"]);

        assert_eq!(plan.len(), 2);
        assert_eq!(plan.steps[1].depends_on, vec!["a".to_string()]);
    }

    #[test]
    fn test_mutation_json() {
        let json = r#"{
            "update": {
                "entity": "Account",
                "id": 7,
                "data": [{ "field": "balance", "delta": { "increment": 10 } }]
            }
        }"#;
        let mutation: Mutation = serde_json::from_str(json).unwrap();

        assert_eq!(
            mutation,
            Mutation::update("Account", 7, vec![FieldUpdate::increment("balance", 10)])
        );
    }
}
