//! Filter resolution and evaluation.
//!
//! [`FilterResolver`] checks a [`FilterExpr`] against the schema and turns it
//! into a [`PredicatePlan`]: a normalized boolean tree whose leaves carry
//! literals already coerced to the field type, and whose relation-scoped
//! parts are correlated `Exists` nodes. [`PredicateEvaluator`] evaluates a
//! plan against rows for stores that filter in memory.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;

use crate::catalog::{EntityDef, FieldDef, FieldType, SchemaRegistry};
use crate::error::{Error, StorageError};
use quarry_proto::{Condition, FilterExpr, Quantifier, Row, Value};

/// A resolved, normalized filter predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum PredicatePlan {
    /// A condition on one field.
    Leaf(LeafPredicate),
    /// All children hold (empty holds).
    And(Vec<PredicatePlan>),
    /// Any child holds (empty never holds).
    Or(Vec<PredicatePlan>),
    /// The child does not hold.
    Not(Box<PredicatePlan>),
    /// Some record of the joined entity correlates with this row and
    /// satisfies the inner predicate.
    Exists {
        join: JoinKeys,
        predicate: Box<PredicatePlan>,
    },
}

/// A resolved leaf condition.
#[derive(Debug, Clone, PartialEq)]
pub struct LeafPredicate {
    /// Entity the field belongs to.
    pub entity: String,
    /// Field name.
    pub field: String,
    /// Declared field type.
    pub field_type: FieldType,
    /// Condition with operands coerced to `field_type`.
    pub condition: Condition,
}

/// Correlation between a row and the records of another entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinKeys {
    /// Field on the outer row.
    pub local_field: String,
    /// Entity scanned by the `Exists`.
    pub target_entity: String,
    /// Field on the target matched against `local_field`.
    pub target_field: String,
}

impl PredicatePlan {
    /// A predicate that holds for every row.
    pub fn always() -> Self {
        PredicatePlan::And(Vec::new())
    }

    /// Combine predicates with AND, flattening nested conjunctions.
    pub fn and(children: Vec<PredicatePlan>) -> Self {
        let mut flat = Vec::with_capacity(children.len());
        for child in children {
            match child {
                PredicatePlan::And(grand) => flat.extend(grand),
                other => flat.push(other),
            }
        }
        if flat.len() == 1 {
            flat.remove(0)
        } else {
            PredicatePlan::And(flat)
        }
    }

    /// Combine predicates with OR, flattening nested disjunctions.
    pub fn or(children: Vec<PredicatePlan>) -> Self {
        let mut flat = Vec::with_capacity(children.len());
        for child in children {
            match child {
                PredicatePlan::Or(grand) => flat.extend(grand),
                other => flat.push(other),
            }
        }
        if flat.len() == 1 {
            flat.remove(0)
        } else {
            PredicatePlan::Or(flat)
        }
    }

    /// Negate a predicate.
    pub fn negate(inner: PredicatePlan) -> Self {
        PredicatePlan::Not(Box::new(inner))
    }

    /// Correlated existence test.
    pub fn exists(join: JoinKeys, predicate: PredicatePlan) -> Self {
        PredicatePlan::Exists {
            join,
            predicate: Box::new(predicate),
        }
    }

    /// Equality on one field; `value` must already be typed for the field.
    pub fn field_equals(entity: &str, field: &FieldDef, value: Value) -> Self {
        PredicatePlan::Leaf(LeafPredicate {
            entity: entity.to_string(),
            field: field.name.clone(),
            field_type: field.field_type.clone(),
            condition: Condition::Equals(value),
        })
    }

    /// Number of leaves in the plan.
    pub fn leaf_count(&self) -> usize {
        match self {
            PredicatePlan::Leaf(_) => 1,
            PredicatePlan::And(children) | PredicatePlan::Or(children) => {
                children.iter().map(PredicatePlan::leaf_count).sum()
            }
            PredicatePlan::Not(inner) => inner.leaf_count(),
            PredicatePlan::Exists { predicate, .. } => predicate.leaf_count(),
        }
    }

    /// Leaves in depth-first order.
    pub fn leaves(&self) -> Vec<&LeafPredicate> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a LeafPredicate>) {
        match self {
            PredicatePlan::Leaf(leaf) => out.push(leaf),
            PredicatePlan::And(children) | PredicatePlan::Or(children) => {
                children.iter().for_each(|c| c.collect_leaves(out))
            }
            PredicatePlan::Not(inner) => inner.collect_leaves(out),
            PredicatePlan::Exists { predicate, .. } => predicate.collect_leaves(out),
        }
    }

    /// Check if the plan holds for every row.
    pub fn is_always(&self) -> bool {
        matches!(self, PredicatePlan::And(children) if children.is_empty())
    }
}

impl fmt::Display for PredicatePlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |f: &mut fmt::Formatter<'_>, children: &[PredicatePlan], op: &str| {
            write!(f, "(")?;
            for (i, child) in children.iter().enumerate() {
                if i > 0 {
                    write!(f, " {op} ")?;
                }
                write!(f, "{child}")?;
            }
            write!(f, ")")
        };
        match self {
            PredicatePlan::Leaf(leaf) => write!(
                f,
                "{}.{} {} {}",
                leaf.entity,
                leaf.field,
                leaf.condition.operator(),
                operand_text(&leaf.condition)
            ),
            PredicatePlan::And(children) if children.is_empty() => write!(f, "TRUE"),
            PredicatePlan::Or(children) if children.is_empty() => write!(f, "FALSE"),
            PredicatePlan::And(children) => join(f, children, "AND"),
            PredicatePlan::Or(children) => join(f, children, "OR"),
            PredicatePlan::Not(inner) => write!(f, "NOT {inner}"),
            PredicatePlan::Exists { join, predicate } => write!(
                f,
                "EXISTS {}[{} = .{}] {}",
                join.target_entity, join.target_field, join.local_field, predicate
            ),
        }
    }
}

fn operand_text(condition: &Condition) -> String {
    match condition {
        Condition::Equals(v)
        | Condition::NotEquals(v)
        | Condition::Gt(v)
        | Condition::Gte(v)
        | Condition::Lt(v)
        | Condition::Lte(v) => v.to_string(),
        Condition::StartsWith(s)
        | Condition::EndsWith(s)
        | Condition::Contains(s)
        | Condition::NotStartsWith(s)
        | Condition::NotEndsWith(s)
        | Condition::NotContains(s) => format!("{s:?}"),
        Condition::In(values) | Condition::NotIn(values) => {
            let items: Vec<String> = values.iter().map(Value::to_string).collect();
            format!("[{}]", items.join(", "))
        }
    }
}

/// Resolves filter expressions against the schema registry.
pub struct FilterResolver<'a> {
    registry: &'a SchemaRegistry,
    max_depth: usize,
}

impl<'a> FilterResolver<'a> {
    /// Create a resolver with a nesting limit.
    pub fn new(registry: &'a SchemaRegistry, max_depth: usize) -> Self {
        Self {
            registry,
            max_depth,
        }
    }

    /// Resolve a filter applied to `entity`.
    pub fn resolve(&self, entity: &EntityDef, filter: &FilterExpr) -> Result<PredicatePlan, Error> {
        self.resolve_at(entity, filter, 1)
    }

    /// Resolve an optional filter; `None` resolves to a predicate that always holds.
    pub fn resolve_optional(
        &self,
        entity: &EntityDef,
        filter: Option<&FilterExpr>,
    ) -> Result<PredicatePlan, Error> {
        match filter {
            Some(filter) => self.resolve(entity, filter),
            None => Ok(PredicatePlan::always()),
        }
    }

    fn resolve_at(
        &self,
        entity: &EntityDef,
        filter: &FilterExpr,
        depth: usize,
    ) -> Result<PredicatePlan, Error> {
        if depth > self.max_depth {
            return Err(Error::InvalidFilter(format!(
                "filter nesting exceeds maximum depth {}",
                self.max_depth
            )));
        }

        let children = |items: &[FilterExpr]| -> Result<Vec<PredicatePlan>, Error> {
            items
                .iter()
                .map(|child| self.resolve_at(entity, child, depth + 1))
                .collect()
        };

        match filter {
            FilterExpr::Field { field, condition } => {
                let def = entity.get_field(field).ok_or_else(|| {
                    Error::InvalidFilter(format!("unknown field '{}' on {}", field, entity.name))
                })?;
                let condition = resolve_condition(entity, def, condition)?;
                Ok(PredicatePlan::Leaf(LeafPredicate {
                    entity: entity.name.clone(),
                    field: def.name.clone(),
                    field_type: def.field_type.clone(),
                    condition,
                }))
            }
            FilterExpr::And(items) => Ok(PredicatePlan::and(children(items)?)),
            FilterExpr::Or(items) => Ok(PredicatePlan::or(children(items)?)),
            FilterExpr::Not(items) => Ok(PredicatePlan::negate(PredicatePlan::or(children(items)?))),
            FilterExpr::Relation {
                relation,
                quantifier,
                filter,
            } => {
                let rel = entity
                    .get_relation(relation)
                    .ok_or_else(|| Error::unknown_relation(&entity.name, relation))?;
                let target = self.registry.resolve(&rel.to_entity)?;
                let nested = self.resolve_at(&target, filter, depth + 1)?;
                let join = JoinKeys {
                    local_field: rel.from_field.clone(),
                    target_entity: rel.to_entity.clone(),
                    target_field: rel.to_field.clone(),
                };
                Ok(match quantifier {
                    Quantifier::Some => PredicatePlan::exists(join, nested),
                    Quantifier::Every => PredicatePlan::negate(PredicatePlan::exists(
                        join,
                        PredicatePlan::negate(nested),
                    )),
                    Quantifier::None => PredicatePlan::negate(PredicatePlan::exists(join, nested)),
                })
            }
        }
    }
}

fn resolve_condition(
    entity: &EntityDef,
    field: &FieldDef,
    condition: &Condition,
) -> Result<Condition, Error> {
    let invalid = |msg: String| {
        Error::InvalidFilter(format!(
            "{}.{} {}: {msg}",
            entity.name,
            field.name,
            condition.operator()
        ))
    };
    let coerce = |value: &Value| field.coerce(value).map_err(invalid);

    if condition.is_string_match() && !field.field_type.is_string_like() {
        return Err(invalid(format!(
            "string operator on {} field",
            field.field_type.name()
        )));
    }
    if condition.is_ordering() && !field.field_type.is_ordered() {
        return Err(invalid(format!(
            "ordering operator on {} field",
            field.field_type.name()
        )));
    }

    Ok(match condition {
        Condition::Equals(v) => Condition::Equals(coerce(v)?),
        Condition::NotEquals(v) => Condition::NotEquals(coerce(v)?),
        Condition::Gt(v) | Condition::Gte(v) | Condition::Lt(v) | Condition::Lte(v)
            if v.is_null() =>
        {
            return Err(invalid("cannot order against null".to_string()))
        }
        Condition::Gt(v) => Condition::Gt(coerce(v)?),
        Condition::Gte(v) => Condition::Gte(coerce(v)?),
        Condition::Lt(v) => Condition::Lt(coerce(v)?),
        Condition::Lte(v) => Condition::Lte(coerce(v)?),
        Condition::In(values) | Condition::NotIn(values) if values.is_empty() => {
            return Err(invalid("empty value list".to_string()))
        }
        Condition::In(values) => {
            Condition::In(values.iter().map(coerce).collect::<Result<_, _>>()?)
        }
        Condition::NotIn(values) => {
            Condition::NotIn(values.iter().map(coerce).collect::<Result<_, _>>()?)
        }
        other => other.clone(),
    })
}

/// Access to stored rows of other entities for correlated predicates.
pub trait RowSource {
    /// All rows of an entity visible to the evaluation.
    fn rows_of(&self, entity: &str) -> Result<Vec<Row>, StorageError>;
}

/// Hashable form of a value used to correlate rows.
///
/// Integer widths share a key, as do floats holding whole numbers, so keys
/// agree with [`values_equal`]. Null and NaN have no key and never join.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum JoinKey {
    Bool(bool),
    Int(i64),
    Float(u64),
    Text(String),
    Bytes(Vec<u8>),
    Timestamp(i64),
    Uuid([u8; 16]),
}

impl JoinKey {
    /// Key of a value, `None` for values that never join.
    pub fn of(value: &Value) -> Option<Self> {
        Some(match value {
            Value::Null => return None,
            Value::Bool(b) => JoinKey::Bool(*b),
            Value::Int32(_) | Value::Int64(_) => JoinKey::Int(value.as_i64()?),
            Value::Float32(_) | Value::Float64(_) => {
                let f = value.as_f64()?;
                if f.is_nan() {
                    return None;
                }
                if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
                    JoinKey::Int(f as i64)
                } else {
                    JoinKey::Float(f.to_bits())
                }
            }
            Value::String(s) => JoinKey::Text(s.clone()),
            Value::Bytes(b) => JoinKey::Bytes(b.clone()),
            Value::Timestamp(t) => JoinKey::Timestamp(*t),
            Value::Uuid(u) => JoinKey::Uuid(*u),
        })
    }
}

/// A predicate plan with every `Exists` node resolved to the set of target
/// join keys that satisfy it.
///
/// The inner predicate of an `Exists` only looks at target rows, so its key
/// set is the same for every outer row and is computed once.
#[derive(Debug)]
pub enum PreparedPredicate<'p> {
    Leaf(&'p LeafPredicate),
    And(Vec<PreparedPredicate<'p>>),
    Or(Vec<PreparedPredicate<'p>>),
    Not(Box<PreparedPredicate<'p>>),
    Exists {
        local_field: &'p str,
        keys: HashSet<JoinKey>,
    },
}

impl PreparedPredicate<'_> {
    /// Check if a row satisfies the predicate.
    pub fn matches(&self, row: &Row) -> bool {
        match self {
            PreparedPredicate::Leaf(leaf) => leaf_matches(leaf, row),
            PreparedPredicate::And(children) => children.iter().all(|c| c.matches(row)),
            PreparedPredicate::Or(children) => children.iter().any(|c| c.matches(row)),
            PreparedPredicate::Not(inner) => !inner.matches(row),
            PreparedPredicate::Exists { local_field, keys } => row
                .get(local_field)
                .and_then(JoinKey::of)
                .is_some_and(|key| keys.contains(&key)),
        }
    }
}

/// Evaluates predicate plans against rows.
pub struct PredicateEvaluator<'a, S: RowSource + ?Sized> {
    source: &'a S,
}

impl<'a, S: RowSource + ?Sized> PredicateEvaluator<'a, S> {
    /// Create an evaluator resolving `Exists` nodes through `source`.
    pub fn new(source: &'a S) -> Self {
        Self { source }
    }

    /// Resolve the correlated parts of a plan, scanning each joined entity
    /// once per `Exists` node.
    pub fn prepare<'p>(
        &self,
        plan: &'p PredicatePlan,
    ) -> Result<PreparedPredicate<'p>, StorageError> {
        let all = |children: &'p [PredicatePlan]| {
            children
                .iter()
                .map(|c| self.prepare(c))
                .collect::<Result<Vec<_>, StorageError>>()
        };
        Ok(match plan {
            PredicatePlan::Leaf(leaf) => PreparedPredicate::Leaf(leaf),
            PredicatePlan::And(children) => PreparedPredicate::And(all(children)?),
            PredicatePlan::Or(children) => PreparedPredicate::Or(all(children)?),
            PredicatePlan::Not(inner) => PreparedPredicate::Not(Box::new(self.prepare(inner)?)),
            PredicatePlan::Exists { join, predicate } => {
                let inner = self.prepare(predicate)?;
                let keys = self
                    .source
                    .rows_of(&join.target_entity)?
                    .iter()
                    .filter(|candidate| inner.matches(candidate))
                    .filter_map(|candidate| candidate.get(&join.target_field).and_then(JoinKey::of))
                    .collect();
                PreparedPredicate::Exists {
                    local_field: &join.local_field,
                    keys,
                }
            }
        })
    }

    /// Keep the rows satisfying a predicate.
    pub fn filter(
        &self,
        plan: &PredicatePlan,
        mut rows: Vec<Row>,
    ) -> Result<Vec<Row>, StorageError> {
        if plan.is_always() || rows.is_empty() {
            return Ok(rows);
        }
        let prepared = self.prepare(plan)?;
        rows.retain(|row| prepared.matches(row));
        Ok(rows)
    }
}

/// Evaluate a leaf against a row.
///
/// A null or missing field matches only `Equals(Null)`; every other
/// operator, including the negated string operators, fails on it.
pub fn leaf_matches(leaf: &LeafPredicate, row: &Row) -> bool {
    let value = row.get(&leaf.field).unwrap_or(&Value::Null);

    if value.is_null() {
        return matches!(&leaf.condition, Condition::Equals(Value::Null));
    }

    match &leaf.condition {
        Condition::Equals(expected) => values_equal(value, expected),
        Condition::NotEquals(expected) => !values_equal(value, expected),
        Condition::Gt(bound) => compare_values(value, bound).is_some_and(Ordering::is_gt),
        Condition::Gte(bound) => compare_values(value, bound).is_some_and(Ordering::is_ge),
        Condition::Lt(bound) => compare_values(value, bound).is_some_and(Ordering::is_lt),
        Condition::Lte(bound) => compare_values(value, bound).is_some_and(Ordering::is_le),
        Condition::StartsWith(s) => value.as_str().is_some_and(|v| v.starts_with(s.as_str())),
        Condition::EndsWith(s) => value.as_str().is_some_and(|v| v.ends_with(s.as_str())),
        Condition::Contains(s) => value.as_str().is_some_and(|v| v.contains(s.as_str())),
        Condition::NotStartsWith(s) => value.as_str().is_some_and(|v| !v.starts_with(s.as_str())),
        Condition::NotEndsWith(s) => value.as_str().is_some_and(|v| !v.ends_with(s.as_str())),
        Condition::NotContains(s) => value.as_str().is_some_and(|v| !v.contains(s.as_str())),
        Condition::In(values) => values.iter().any(|v| values_equal(value, v)),
        Condition::NotIn(values) => !values.iter().any(|v| values_equal(value, v)),
    }
}

/// Check if two values are equal, widening numeric types.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Int32(_) | Value::Int64(_), Value::Int32(_) | Value::Int64(_)) => {
            a.as_i64() == b.as_i64()
        }
        (
            Value::Float32(_) | Value::Float64(_),
            Value::Float32(_) | Value::Float64(_) | Value::Int32(_) | Value::Int64(_),
        )
        | (Value::Int32(_) | Value::Int64(_), Value::Float32(_) | Value::Float64(_)) => {
            a.as_f64() == b.as_f64()
        }
        _ => a == b,
    }
}

/// Compare two values, returning their ordering if comparable.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Int32(_) | Value::Int64(_), Value::Int32(_) | Value::Int64(_)) => {
            Some(a.as_i64()?.cmp(&b.as_i64()?))
        }
        (
            Value::Float32(_) | Value::Float64(_) | Value::Int32(_) | Value::Int64(_),
            Value::Float32(_) | Value::Float64(_) | Value::Int32(_) | Value::Int64(_),
        ) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Timestamp(a), Value::Timestamp(b)) => Some(a.cmp(b)),
        (Value::Bytes(a), Value::Bytes(b)) => Some(a.cmp(b)),
        (Value::Uuid(a), Value::Uuid(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Total order used for sorting: nulls first, incomparable values equal.
pub fn sort_compare(a: &Value, b: &Value) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => compare_values(a, b).unwrap_or(Ordering::Equal),
    }
}
