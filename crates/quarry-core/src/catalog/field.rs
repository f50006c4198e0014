//! Field definitions for entities.

use super::types::FieldType;
use quarry_proto::Value;
use serde::{Deserialize, Serialize};

/// A field definition within an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    /// Field name.
    pub name: String,
    /// Field data type.
    pub field_type: FieldType,
    /// Whether the field accepts null.
    #[serde(default)]
    pub nullable: bool,
    /// Default value if not provided on create.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<DefaultValue>,
}

/// Default value for a field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultValue {
    /// A literal value.
    Value(Value),
    /// Current timestamp (evaluated at insert time).
    CurrentTimestamp,
    /// Random UUID (evaluated at insert time).
    AutoUuid,
}

impl DefaultValue {
    /// Produce the value to store.
    pub fn evaluate(&self) -> Value {
        match self {
            DefaultValue::Value(v) => v.clone(),
            DefaultValue::CurrentTimestamp => Value::Timestamp(current_timestamp()),
            DefaultValue::AutoUuid => Value::Uuid(*uuid::Uuid::new_v4().as_bytes()),
        }
    }
}

/// Current time in microseconds since the Unix epoch.
pub fn current_timestamp() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0)
}

impl FieldDef {
    /// Create a new non-nullable field.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            nullable: false,
            default: None,
        }
    }

    /// Create a nullable field.
    pub fn optional(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            nullable: true,
            ..Self::new(name, field_type)
        }
    }

    /// Set the default value.
    pub fn with_default(mut self, default: DefaultValue) -> Self {
        self.default = Some(default);
        self
    }

    /// Check if this field has a default value.
    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }

    /// Check if a create must supply this field.
    pub fn is_required(&self) -> bool {
        !self.nullable && self.default.is_none()
    }

    /// Coerce a literal to this field's type, honouring nullability.
    pub fn coerce(&self, value: &Value) -> Result<Value, String> {
        if value.is_null() {
            return if self.nullable {
                Ok(Value::Null)
            } else {
                Err(format!("field '{}' is not nullable", self.name))
            };
        }
        self.field_type
            .coerce(value)
            .map_err(|e| format!("field '{}': {e}", self.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::types::ScalarType;

    #[test]
    fn test_field_def_builder() {
        let field = FieldDef::new("id", FieldType::scalar(ScalarType::Uuid))
            .with_default(DefaultValue::AutoUuid);

        assert_eq!(field.name, "id");
        assert!(!field.nullable);
        assert!(field.has_default());
        assert!(!field.is_required());
    }

    #[test]
    fn test_optional_field() {
        let field = FieldDef::optional("description", FieldType::scalar(ScalarType::String));

        assert!(field.nullable);
        assert!(!field.is_required());
        assert_eq!(field.coerce(&Value::Null), Ok(Value::Null));
    }

    #[test]
    fn test_coerce_rejects_null_for_required() {
        let field = FieldDef::new("email", FieldType::scalar(ScalarType::String));
        let err = field.coerce(&Value::Null).unwrap_err();
        assert!(err.contains("not nullable"));
    }

    #[test]
    fn test_default_evaluation() {
        assert_eq!(
            DefaultValue::Value(Value::Bool(false)).evaluate(),
            Value::Bool(false)
        );
        assert!(matches!(DefaultValue::AutoUuid.evaluate(), Value::Uuid(_)));
        assert!(matches!(
            DefaultValue::CurrentTimestamp.evaluate(),
            Value::Timestamp(t) if t > 0
        ));
    }
}
