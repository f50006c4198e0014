//! Result types for reads and writes.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::Error;
use crate::value::Value;
use rkyv::{Archive, Deserialize, Serialize};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize as SerdeDeserialize, Deserializer, Serialize as SerdeSerialize, Serializer};

/// One record's field values in field order.
///
/// Serializes to JSON as an object keyed by field name.
#[derive(Debug, Clone, Default, PartialEq, Archive, Serialize, Deserialize)]
pub struct Row {
    /// Field name and value pairs.
    pub fields: Vec<(String, Value)>,
}

impl Row {
    /// Create an empty row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a row from field pairs.
    pub fn from_fields(fields: Vec<(String, Value)>) -> Self {
        Self { fields }
    }

    /// Builder: add a field.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(field, value.into());
        self
    }

    /// Get a field value by name.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.iter().find(|(name, _)| name == field).map(|(_, v)| v)
    }

    /// Set a field value, replacing an existing one in place.
    pub fn set(&mut self, field: impl Into<String>, value: Value) {
        let field = field.into();
        match self.fields.iter_mut().find(|(name, _)| *name == field) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((field, value)),
        }
    }

    /// Check if the row has a field.
    pub fn contains(&self, field: &str) -> bool {
        self.get(field).is_some()
    }

    /// Keep only the named fields, in the given order.
    pub fn project(&self, fields: &[String]) -> Row {
        Row {
            fields: fields
                .iter()
                .filter_map(|f| self.get(f).map(|v| (f.clone(), v.clone())))
                .collect(),
        }
    }

    /// Get the number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Check if the row has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Encode the row with rkyv.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map(|bytes| bytes.to_vec())
            .map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Decode a row previously encoded with [`Row::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        // Stored buffers carry no alignment guarantee.
        let mut aligned = rkyv::util::AlignedVec::<16>::with_capacity(bytes.len());
        aligned.extend_from_slice(bytes);
        rkyv::from_bytes::<Row, rkyv::rancor::Error>(&aligned)
            .map_err(|e| Error::Deserialization(e.to_string()))
    }
}

impl SerdeSerialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

impl<'de> SerdeDeserialize<'de> for Row {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RowVisitor;

        impl<'de> Visitor<'de> for RowVisitor {
            type Value = Row;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of field names to values")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Row, A::Error> {
                let mut row = Row::new();
                while let Some((name, value)) = access.next_entry::<String, Value>()? {
                    row.set(name, value);
                }
                Ok(row)
            }
        }

        deserializer.deserialize_map(RowVisitor)
    }
}

/// A record in a read result with its nested relation results.
#[derive(Debug, Clone, Default, PartialEq, SerdeSerialize, SerdeDeserialize)]
pub struct RecordNode {
    /// Requested scalar values.
    pub values: Row,
    /// Related records keyed by relation name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub relations: BTreeMap<String, Vec<RecordNode>>,
}

impl RecordNode {
    /// Create a node with no relations.
    pub fn new(values: Row) -> Self {
        Self {
            values,
            relations: BTreeMap::new(),
        }
    }

    /// Get a scalar value.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }

    /// Get the related records for a relation (empty if not requested).
    pub fn related(&self, relation: &str) -> &[RecordNode] {
        self.relations.get(relation).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Result of a read.
#[derive(Debug, Clone, Default, PartialEq, SerdeSerialize, SerdeDeserialize)]
pub struct ReadResult {
    /// Root records in result order.
    pub records: Vec<RecordNode>,
    /// Cursor of the first root record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_cursor: Option<String>,
    /// Cursor of the last root record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_cursor: Option<String>,
}

impl ReadResult {
    /// Get the number of root records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if no records were returned.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Result of a mutation.
#[derive(Debug, Clone, Default, PartialEq, SerdeSerialize, SerdeDeserialize)]
pub struct MutationResult {
    /// Records directly affected (created, updated or deleted).
    pub affected: u64,
    /// Identity values of created records, root record first.
    #[serde(default)]
    pub generated_ids: Vec<Value>,
    /// Records changed by on-delete referential actions.
    #[serde(default)]
    pub cascaded: u64,
}

impl MutationResult {
    /// Create a result with an affected count.
    pub fn affected(count: u64) -> Self {
        Self {
            affected: count,
            ..Default::default()
        }
    }

    /// The first generated identity (the root record of a create).
    pub fn id(&self) -> Option<&Value> {
        self.generated_ids.first()
    }
}

/// Result of one transaction step.
#[derive(Debug, Clone, PartialEq, SerdeSerialize, SerdeDeserialize)]
pub struct StepResult {
    /// Step label.
    pub label: String,
    /// Step outcome.
    pub result: MutationResult,
}

/// Result of a transaction, steps in execution order.
#[derive(Debug, Clone, Default, PartialEq, SerdeSerialize, SerdeDeserialize)]
pub struct TransactionResult {
    pub steps: Vec<StepResult>,
}

impl TransactionResult {
    /// Get the result of a step by label.
    pub fn get(&self, label: &str) -> Option<&MutationResult> {
        self.steps.iter().find(|s| s.label == label).map(|s| &s.result)
    }

    /// Step labels in execution order.
    pub fn labels(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.label.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_set_replaces() {
        let mut row = Row::new().with("id", 1).with("name", "Alice");
        row.set("name", Value::String("Bob".into()));

        assert_eq!(row.len(), 2);
        assert_eq!(row.get("name"), Some(&Value::String("Bob".into())));
    }

    #[test]
    fn test_row_project() {
        let row = Row::new().with("id", 1).with("name", "Alice").with("age", 30);
        let projected = row.project(&["age".to_string(), "id".to_string(), "missing".to_string()]);

        assert_eq!(projected.fields, vec![
            ("age".to_string(), Value::Int32(30)),
            ("id".to_string(), Value::Int32(1)),
        ]);
    }

    #[test]
    fn test_row_json_is_object() {
        let row = Row::new().with("id", 1).with("name", "Alice");
        let json = serde_json::to_string(&row).unwrap();
        assert_eq!(json, r#"{"id":1,"name":"Alice"}"#);

        let decoded: Row = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, row);
    }

    #[test]
    fn test_row_bytes() {
        let row = Row::new().with("id", Value::Uuid([3; 16])).with("n", Value::Null);
        let bytes = row.to_bytes().unwrap();
        assert_eq!(Row::from_bytes(&bytes).unwrap(), row);
        assert!(Row::from_bytes(&[1, 2]).is_err());
    }

    #[test]
    fn test_transaction_result_lookup() {
        let result = TransactionResult {
            steps: vec![
                StepResult { label: "debit".into(), result: MutationResult::affected(1) },
                StepResult { label: "credit".into(), result: MutationResult::affected(1) },
            ],
        };

        assert_eq!(result.labels(), vec!["debit", "credit"]);
        assert_eq!(result.get("credit").map(|r| r.affected), Some(1));
        assert!(result.get("missing").is_none());
    }
}
