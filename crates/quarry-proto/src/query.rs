//! Read request IR: filters, ordering, pagination and read shapes.

use std::collections::BTreeMap;

use crate::value::Value;
use serde::{Deserialize, Serialize};

/// Filter expression tree evaluated against one entity.
///
/// Leaves compare a field of the filtered entity; `Relation` nodes scope a
/// nested filter to the records reachable through a relation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterExpr {
    /// A condition on a single field.
    Field {
        /// Field name on the filtered entity.
        field: String,
        /// Condition the field value must satisfy.
        condition: Condition,
    },
    /// All children must match (empty matches everything).
    And(Vec<FilterExpr>),
    /// At least one child must match (empty matches nothing).
    Or(Vec<FilterExpr>),
    /// None of the children may match.
    Not(Vec<FilterExpr>),
    /// A quantified condition over related records.
    Relation {
        /// Relation name on the filtered entity.
        relation: String,
        /// How many related records must match.
        quantifier: Quantifier,
        /// Filter applied to the related records.
        filter: Box<FilterExpr>,
    },
}

/// Leaf condition on a field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    Equals(Value),
    NotEquals(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    StartsWith(String),
    EndsWith(String),
    Contains(String),
    NotStartsWith(String),
    NotEndsWith(String),
    NotContains(String),
    In(Vec<Value>),
    NotIn(Vec<Value>),
}

impl Condition {
    /// Operator name, used in error messages and plan explanations.
    pub fn operator(&self) -> &'static str {
        match self {
            Condition::Equals(_) => "equals",
            Condition::NotEquals(_) => "not_equals",
            Condition::Gt(_) => "gt",
            Condition::Gte(_) => "gte",
            Condition::Lt(_) => "lt",
            Condition::Lte(_) => "lte",
            Condition::StartsWith(_) => "starts_with",
            Condition::EndsWith(_) => "ends_with",
            Condition::Contains(_) => "contains",
            Condition::NotStartsWith(_) => "not_starts_with",
            Condition::NotEndsWith(_) => "not_ends_with",
            Condition::NotContains(_) => "not_contains",
            Condition::In(_) => "in",
            Condition::NotIn(_) => "not_in",
        }
    }

    /// Check if this is one of the string-matching operators.
    pub fn is_string_match(&self) -> bool {
        matches!(
            self,
            Condition::StartsWith(_)
                | Condition::EndsWith(_)
                | Condition::Contains(_)
                | Condition::NotStartsWith(_)
                | Condition::NotEndsWith(_)
                | Condition::NotContains(_)
        )
    }

    /// Check if this is an ordering comparison.
    pub fn is_ordering(&self) -> bool {
        matches!(
            self,
            Condition::Gt(_) | Condition::Gte(_) | Condition::Lt(_) | Condition::Lte(_)
        )
    }
}

/// Quantifier for relation-scoped filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quantifier {
    /// At least one related record matches.
    Some,
    /// Every related record matches (vacuously true with none).
    Every,
    /// No related record matches.
    None,
}

impl FilterExpr {
    /// Create a field condition.
    pub fn field(field: impl Into<String>, condition: Condition) -> Self {
        FilterExpr::Field {
            field: field.into(),
            condition,
        }
    }

    /// Create an equality filter.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::field(field, Condition::Equals(value.into()))
    }

    /// Create a not-equal filter.
    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::field(field, Condition::NotEquals(value.into()))
    }

    /// Create a greater-than filter.
    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::field(field, Condition::Gt(value.into()))
    }

    /// Create a greater-than-or-equal filter.
    pub fn gte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::field(field, Condition::Gte(value.into()))
    }

    /// Create a less-than filter.
    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::field(field, Condition::Lt(value.into()))
    }

    /// Create a less-than-or-equal filter.
    pub fn lte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::field(field, Condition::Lte(value.into()))
    }

    /// Create a prefix match filter.
    pub fn starts_with(field: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self::field(field, Condition::StartsWith(prefix.into()))
    }

    /// Create a suffix match filter.
    pub fn ends_with(field: impl Into<String>, suffix: impl Into<String>) -> Self {
        Self::field(field, Condition::EndsWith(suffix.into()))
    }

    /// Create a substring match filter.
    pub fn contains(field: impl Into<String>, needle: impl Into<String>) -> Self {
        Self::field(field, Condition::Contains(needle.into()))
    }

    /// Create an IN filter.
    pub fn in_values(field: impl Into<String>, values: Vec<Value>) -> Self {
        Self::field(field, Condition::In(values))
    }

    /// Create a NOT IN filter.
    pub fn not_in_values(field: impl Into<String>, values: Vec<Value>) -> Self {
        Self::field(field, Condition::NotIn(values))
    }

    /// Combine filters with AND.
    pub fn and(children: Vec<FilterExpr>) -> Self {
        FilterExpr::And(children)
    }

    /// Combine filters with OR.
    pub fn or(children: Vec<FilterExpr>) -> Self {
        FilterExpr::Or(children)
    }

    /// Negate a filter.
    pub fn not(child: FilterExpr) -> Self {
        FilterExpr::Not(vec![child])
    }

    /// Related records: at least one matches.
    pub fn some(relation: impl Into<String>, filter: FilterExpr) -> Self {
        Self::quantified(relation, Quantifier::Some, filter)
    }

    /// Related records: all match.
    pub fn every(relation: impl Into<String>, filter: FilterExpr) -> Self {
        Self::quantified(relation, Quantifier::Every, filter)
    }

    /// Related records: none match.
    pub fn none(relation: impl Into<String>, filter: FilterExpr) -> Self {
        Self::quantified(relation, Quantifier::None, filter)
    }

    fn quantified(relation: impl Into<String>, quantifier: Quantifier, filter: FilterExpr) -> Self {
        FilterExpr::Relation {
            relation: relation.into(),
            quantifier,
            filter: Box::new(filter),
        }
    }

    /// Count the field leaves in this tree.
    pub fn leaf_count(&self) -> usize {
        match self {
            FilterExpr::Field { .. } => 1,
            FilterExpr::And(children) | FilterExpr::Or(children) | FilterExpr::Not(children) => {
                children.iter().map(FilterExpr::leaf_count).sum()
            }
            FilterExpr::Relation { filter, .. } => filter.leaf_count(),
        }
    }
}

/// Order specification for sorting results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSpec {
    /// Field to order by.
    pub field: String,
    /// Sort direction.
    #[serde(default)]
    pub direction: OrderDirection,
}

impl OrderSpec {
    /// Create an ascending order spec.
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: OrderDirection::Asc,
        }
    }

    /// Create a descending order spec.
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: OrderDirection::Desc,
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderDirection {
    /// Ascending order.
    #[default]
    Asc,
    /// Descending order.
    Desc,
}

impl OrderDirection {
    /// The opposite direction.
    pub fn reverse(self) -> Self {
        match self {
            OrderDirection::Asc => OrderDirection::Desc,
            OrderDirection::Desc => OrderDirection::Asc,
        }
    }
}

/// Pagination arguments as supplied by a caller.
///
/// Offset mode uses `skip`/`take`; cursor mode uses `after` or `before`
/// with `take`. Fields are signed so that malformed input is representable
/// and rejected by the planner rather than by the decoder.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationArgs {
    /// Number of records to skip.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip: Option<i64>,
    /// Maximum number of records to return (absent = unbounded).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub take: Option<i64>,
    /// Cursor token: return records strictly after it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
    /// Cursor token: return records strictly before it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<String>,
}

impl PaginationArgs {
    /// Offset pagination.
    pub fn offset(skip: i64, take: i64) -> Self {
        Self {
            skip: Some(skip),
            take: Some(take),
            ..Default::default()
        }
    }

    /// Only a limit.
    pub fn take(take: i64) -> Self {
        Self {
            take: Some(take),
            ..Default::default()
        }
    }

    /// Records after a cursor.
    pub fn after(cursor: impl Into<String>, take: i64) -> Self {
        Self {
            after: Some(cursor.into()),
            take: Some(take),
            ..Default::default()
        }
    }

    /// Records before a cursor.
    pub fn before(cursor: impl Into<String>, take: i64) -> Self {
        Self {
            before: Some(cursor.into()),
            take: Some(take),
            ..Default::default()
        }
    }
}

/// Requested shape of a read: scalar fields plus nested relations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReadShape {
    /// Scalar fields to return (empty = all fields).
    #[serde(default)]
    pub fields: Vec<String>,
    /// Relations to traverse, keyed by relation name.
    #[serde(default)]
    pub relations: BTreeMap<String, RelationRead>,
}

impl ReadShape {
    /// Shape returning every scalar field and no relations.
    pub fn all() -> Self {
        Self::default()
    }

    /// Shape returning only the given fields.
    pub fn fields<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
            relations: BTreeMap::new(),
        }
    }

    /// Include a relation.
    pub fn with_relation(mut self, name: impl Into<String>, read: RelationRead) -> Self {
        self.relations.insert(name.into(), read);
        self
    }

    /// Depth of the deepest relation in this shape (0 = no relations).
    pub fn depth(&self) -> usize {
        self.relations
            .values()
            .map(|r| 1 + r.shape.depth())
            .max()
            .unwrap_or(0)
    }
}

/// A relation read within a shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelationRead {
    /// Shape of the related records.
    #[serde(default)]
    pub shape: ReadShape,
    /// Filter applied to the related records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<FilterExpr>,
    /// Ordering of the related records.
    #[serde(default)]
    pub order_by: Vec<OrderSpec>,
    /// Pagination applied per parent record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pagination: Option<PaginationArgs>,
}

impl RelationRead {
    /// Read related records with the given shape.
    pub fn new(shape: ReadShape) -> Self {
        Self {
            shape,
            ..Default::default()
        }
    }

    /// Set a filter for the related records.
    pub fn with_filter(mut self, filter: FilterExpr) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Add ordering for the related records.
    pub fn with_order(mut self, order: OrderSpec) -> Self {
        self.order_by.push(order);
        self
    }

    /// Set per-parent pagination.
    pub fn with_pagination(mut self, pagination: PaginationArgs) -> Self {
        self.pagination = Some(pagination);
        self
    }
}

/// A complete read request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadQuery {
    /// Root entity to read.
    pub entity: String,
    /// Filter for root records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<FilterExpr>,
    /// Ordering of root records.
    #[serde(default)]
    pub order_by: Vec<OrderSpec>,
    /// Pagination of root records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pagination: Option<PaginationArgs>,
    /// Requested shape.
    #[serde(default)]
    pub shape: ReadShape,
}

impl ReadQuery {
    /// Create a read of every scalar field of an entity.
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            filter: None,
            order_by: vec![],
            pagination: None,
            shape: ReadShape::default(),
        }
    }

    /// Set a filter for the root records.
    pub fn with_filter(mut self, filter: FilterExpr) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Add ordering for the root records.
    pub fn with_order(mut self, order: OrderSpec) -> Self {
        self.order_by.push(order);
        self
    }

    /// Set pagination for the root records.
    pub fn with_pagination(mut self, pagination: PaginationArgs) -> Self {
        self.pagination = Some(pagination);
        self
    }

    /// Set the read shape.
    pub fn with_shape(mut self, shape: ReadShape) -> Self {
        self.shape = shape;
        self
    }
}
