//! Mutation planning.
//!
//! The planner validates a [`Mutation`] against the schema and lowers it to
//! an ordered list of [`WriteStep`]s. Everything that can be checked without
//! reading data is checked here, so a plan that builds only fails at
//! execution on data conditions (missing records, broken references).

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::catalog::{DefaultValue, DeleteBehavior, EntityDef, FieldDef, ScalarType, SchemaRegistry};
use crate::config::EngineConfig;
use crate::error::Error;
use crate::query::{FilterResolver, JoinKeys, PredicatePlan};
use crate::storage::{Assignment, IdentityGen};
use quarry_proto::{CreateInput, FieldDelta, FieldUpdate, FilterExpr, Mutation, Row, Value};

/// A validated, ordered write plan for one mutation.
#[derive(Debug, Clone)]
pub struct MutationPlan {
    /// Entity the mutation targets.
    pub entity: String,
    /// Operation name.
    pub kind: &'static str,
    /// Steps in execution order.
    pub steps: Vec<WriteStep>,
    /// Number of records a create inserts; 0 for other operations.
    pub created: usize,
}

/// One step of a mutation plan.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteStep {
    /// Insert one record of a create.
    Insert(InsertStep),
    /// A record with `field = value` must exist.
    RequireReference {
        entity: String,
        field: String,
        value: Value,
    },
    /// No record may match the predicate.
    RequireAbsent {
        entity: String,
        predicate: PredicatePlan,
        reason: String,
    },
    /// A cascade reached the depth limit; no record may match the
    /// predicate of the next, unexpanded level.
    CascadeLimit {
        entity: String,
        predicate: PredicatePlan,
        depth: usize,
        max: usize,
    },
    /// Update matching records.
    Update {
        entity: String,
        predicate: PredicatePlan,
        assignments: Vec<Assignment>,
        target: Target,
    },
    /// Delete matching records.
    Delete {
        entity: String,
        predicate: PredicatePlan,
        target: Target,
    },
}

/// What an update or delete step is expected to hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Exactly one record, by identity; zero matches is `NotFound`.
    One { id: String },
    /// Any number of records, zero included.
    Many,
    /// Records reached by a referential action.
    Cascade,
}

/// Insert of one record within a create.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertStep {
    /// Position of the record in creation order (root = 0).
    pub node: usize,
    pub entity: String,
    pub identity_field: String,
    pub identity: IdentityGen,
    /// Values known at planning time, already typed.
    pub values: Row,
    /// Key fields copied from records inserted earlier in the plan.
    pub bindings: Vec<Binding>,
    /// Fields whose defaults are evaluated at insert time.
    pub deferred_defaults: Vec<FieldDef>,
}

/// A key field filled from another record of the same create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    /// Field set on the inserted record.
    pub field: String,
    /// Node the value is read from.
    pub source: usize,
    /// Field read on the source node.
    pub source_field: String,
}

impl MutationPlan {
    /// Insert steps of the plan.
    pub fn inserts(&self) -> impl Iterator<Item = &InsertStep> {
        self.steps.iter().filter_map(|step| match step {
            WriteStep::Insert(insert) => Some(insert),
            _ => None,
        })
    }
}

impl fmt::Display for MutationPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} {}", self.kind, self.entity)?;
        for (i, step) in self.steps.iter().enumerate() {
            write!(f, "  {i}: ")?;
            match step {
                WriteStep::Insert(insert) => {
                    write!(f, "insert {} #{}", insert.entity, insert.node)?;
                    for binding in &insert.bindings {
                        write!(
                            f,
                            " {}<-#{}.{}",
                            binding.field, binding.source, binding.source_field
                        )?;
                    }
                }
                WriteStep::RequireReference {
                    entity,
                    field,
                    value,
                } => write!(f, "require {entity}.{field} = {value}")?,
                WriteStep::RequireAbsent {
                    entity, predicate, ..
                } => write!(f, "require no {entity} where {predicate}")?,
                WriteStep::CascadeLimit {
                    entity,
                    predicate,
                    max,
                    ..
                } => write!(f, "require no {entity} where {predicate} (depth limit {max})")?,
                WriteStep::Update {
                    entity,
                    predicate,
                    assignments,
                    target,
                } => {
                    let fields: Vec<&str> =
                        assignments.iter().map(|a| a.field.as_str()).collect();
                    write!(
                        f,
                        "update {entity} set {} where {predicate}{}",
                        fields.join(", "),
                        target_suffix(target)
                    )?
                }
                WriteStep::Delete {
                    entity,
                    predicate,
                    target,
                } => write!(f, "delete {entity} where {predicate}{}", target_suffix(target))?,
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

fn target_suffix(target: &Target) -> &'static str {
    match target {
        Target::One { .. } => " (one)",
        Target::Many => "",
        Target::Cascade => " (cascade)",
    }
}

/// Plans mutations against the schema registry.
pub struct MutationPlanner<'a> {
    registry: &'a SchemaRegistry,
    config: &'a EngineConfig,
}

/// One record of a nested create, before ordering.
struct CreateNode<'i> {
    entity: Arc<EntityDef>,
    input: &'i CreateInput,
    bindings: Vec<Binding>,
}

impl<'a> MutationPlanner<'a> {
    /// Create a planner.
    pub fn new(registry: &'a SchemaRegistry, config: &'a EngineConfig) -> Self {
        Self { registry, config }
    }

    /// Plan a mutation.
    pub fn plan(&self, mutation: &Mutation) -> Result<MutationPlan, Error> {
        let entity = self.registry.resolve(mutation.entity())?;
        let mut created = 0;
        let steps = match mutation {
            Mutation::Create { input, .. } => {
                let steps = self.plan_create(&entity, input)?;
                created = steps
                    .iter()
                    .filter(|s| matches!(s, WriteStep::Insert(_)))
                    .count();
                steps
            }
            Mutation::Update { id, data, .. } => {
                let (predicate, target) = self.by_identity(&entity, id)?;
                self.plan_update(&entity, predicate, data, target)?
            }
            Mutation::UpdateMany { filter, data, .. } => {
                let predicate = self.resolve_filter(&entity, filter)?;
                self.plan_update(&entity, predicate, data, Target::Many)?
            }
            Mutation::Delete { id, .. } => {
                let (predicate, target) = self.by_identity(&entity, id)?;
                self.plan_delete(&entity, predicate, target)?
            }
            Mutation::DeleteMany { filter, .. } => {
                let predicate = self.resolve_filter(&entity, filter)?;
                self.plan_delete(&entity, predicate, Target::Many)?
            }
        };

        debug!(
            entity = %entity.name,
            kind = mutation.kind(),
            steps = steps.len(),
            "planned mutation"
        );
        Ok(MutationPlan {
            entity: entity.name.clone(),
            kind: mutation.kind(),
            steps,
            created,
        })
    }

    fn resolve_filter(&self, entity: &EntityDef, filter: &FilterExpr) -> Result<PredicatePlan, Error> {
        FilterResolver::new(self.registry, self.config.max_filter_depth).resolve(entity, filter)
    }

    fn by_identity(&self, entity: &EntityDef, id: &Value) -> Result<(PredicatePlan, Target), Error> {
        let field = identity_def(entity)?;
        if id.is_null() {
            return Err(Error::Validation(format!(
                "{} identity cannot be null",
                entity.name
            )));
        }
        let id = field
            .coerce(id)
            .map_err(|e| Error::Validation(format!("{}: {e}", entity.name)))?;
        let target = Target::One { id: id.to_string() };
        Ok((PredicatePlan::field_equals(&entity.name, field, id), target))
    }

    // ---- create ----

    fn plan_create(&self, entity: &Arc<EntityDef>, input: &CreateInput) -> Result<Vec<WriteStep>, Error> {
        let mut nodes = vec![CreateNode {
            entity: entity.clone(),
            input,
            bindings: Vec::new(),
        }];
        // (before, after) pairs: `before` must be inserted first.
        let mut edges: Vec<(usize, usize)> = Vec::new();
        self.expand_nested(0, &mut nodes, &mut edges)?;

        let mut checks = Vec::new();
        let mut inserts = Vec::with_capacity(nodes.len());
        for (index, node) in nodes.iter().enumerate() {
            let insert = self.plan_insert(index, node, &mut checks)?;
            inserts.push(Some(insert));
        }

        let order = topological_order(nodes.len(), &edges)?;
        let mut steps = checks;
        for index in order {
            if let Some(insert) = inserts[index].take() {
                steps.push(WriteStep::Insert(insert));
            }
        }
        Ok(steps)
    }

    /// Walk nested creates below `parent`, appending nodes in creation order.
    fn expand_nested<'i>(
        &self,
        parent: usize,
        nodes: &mut Vec<CreateNode<'i>>,
        edges: &mut Vec<(usize, usize)>,
    ) -> Result<(), Error> {
        let parent_entity = nodes[parent].entity.clone();
        let input = nodes[parent].input;

        for (name, children) in &input.nested {
            let relation = parent_entity
                .get_relation(name)
                .ok_or_else(|| Error::unknown_relation(&parent_entity.name, name))?;
            if !relation.is_many() && children.len() > 1 {
                return Err(Error::Validation(format!(
                    "relation {}.{} holds one record, got {} nested creates",
                    parent_entity.name,
                    name,
                    children.len()
                )));
            }
            let target = self.registry.resolve(&relation.to_entity)?;
            let fk = relation.foreign_key();
            let key_on_child = fk.holder == relation.to_entity && fk.key_field == relation.to_field;

            for child_input in children {
                let child = nodes.len();
                if key_on_child {
                    nodes.push(CreateNode {
                        entity: target.clone(),
                        input: child_input,
                        bindings: vec![Binding {
                            field: relation.to_field.clone(),
                            source: parent,
                            source_field: relation.from_field.clone(),
                        }],
                    });
                    edges.push((parent, child));
                } else {
                    nodes.push(CreateNode {
                        entity: target.clone(),
                        input: child_input,
                        bindings: Vec::new(),
                    });
                    let binding = Binding {
                        field: relation.from_field.clone(),
                        source: child,
                        source_field: relation.to_field.clone(),
                    };
                    if nodes[parent].bindings.iter().any(|b| b.field == binding.field) {
                        return Err(Error::Validation(format!(
                            "{}.{} is bound by more than one nested create",
                            parent_entity.name, binding.field
                        )));
                    }
                    nodes[parent].bindings.push(binding);
                    edges.push((child, parent));
                }
                self.expand_nested(child, nodes, edges)?;
            }
        }
        Ok(())
    }

    fn plan_insert(
        &self,
        index: usize,
        node: &CreateNode<'_>,
        checks: &mut Vec<WriteStep>,
    ) -> Result<InsertStep, Error> {
        let entity = &node.entity;
        let invalid = |msg: String| Error::Validation(format!("{}: {msg}", entity.name));
        let is_bound = |field: &str| node.bindings.iter().any(|b| b.field == field);

        let mut values = Row::new();
        for item in &node.input.data {
            let def = entity
                .get_field(&item.field)
                .ok_or_else(|| invalid(format!("unknown field '{}'", item.field)))?;
            if values.contains(&def.name) {
                return Err(invalid(format!("field '{}' given twice", def.name)));
            }
            if is_bound(&def.name) {
                return Err(invalid(format!(
                    "field '{}' is set by a nested create and cannot be given explicitly",
                    def.name
                )));
            }
            values.set(def.name.clone(), def.coerce(&item.value).map_err(invalid)?);
        }

        let identity_field = identity_def(entity)?;
        let mut deferred_defaults = Vec::new();
        for def in &entity.fields {
            if values.contains(&def.name) || is_bound(&def.name) {
                continue;
            }
            match &def.default {
                Some(DefaultValue::Value(value)) => {
                    values.set(def.name.clone(), def.coerce(value).map_err(invalid)?);
                }
                Some(_) => deferred_defaults.push(def.clone()),
                None if def.name == identity_field.name => {}
                None if def.nullable => values.set(def.name.clone(), Value::Null),
                None => return Err(invalid(format!("missing required field '{}'", def.name))),
            }
        }

        let identity = if values.contains(&identity_field.name)
            || is_bound(&identity_field.name)
            || deferred_defaults.iter().any(|d| d.name == identity_field.name)
        {
            IdentityGen::Provided
        } else {
            match identity_field.field_type.scalar_type() {
                Some(ScalarType::Uuid) => IdentityGen::Uuid,
                Some(scalar @ (ScalarType::Int32 | ScalarType::Int64)) => IdentityGen::Sequence(scalar),
                _ => {
                    return Err(invalid(format!(
                        "identity '{}' must be provided",
                        identity_field.name
                    )))
                }
            }
        };

        for item in &node.input.data {
            if let Some(value) = values.get(&item.field) {
                self.reference_checks(entity, &item.field, value, checks);
            }
        }

        Ok(InsertStep {
            node: index,
            entity: entity.name.clone(),
            identity_field: identity_field.name.clone(),
            identity,
            values,
            bindings: node.bindings.clone(),
            deferred_defaults,
        })
    }

    /// Add a check that a supplied foreign-key value references a record.
    fn reference_checks(&self, entity: &EntityDef, field: &str, value: &Value, checks: &mut Vec<WriteStep>) {
        if value.is_null() {
            return;
        }
        for relation in self.registry.keys_held_by(&entity.name) {
            let fk = relation.foreign_key();
            if fk.key_field != field {
                continue;
            }
            let check = WriteStep::RequireReference {
                entity: fk.referenced.to_string(),
                field: fk.referenced_field.to_string(),
                value: value.clone(),
            };
            if !checks.contains(&check) {
                checks.push(check);
            }
        }
    }

    // ---- update ----

    fn plan_update(
        &self,
        entity: &EntityDef,
        predicate: PredicatePlan,
        data: &[FieldUpdate],
        target: Target,
    ) -> Result<Vec<WriteStep>, Error> {
        let invalid = |msg: String| Error::Validation(format!("{}: {msg}", entity.name));
        if data.is_empty() {
            return Err(invalid("update has no fields".to_string()));
        }

        let mut steps = Vec::new();
        let mut assignments: Vec<Assignment> = Vec::with_capacity(data.len());
        for update in data {
            let def = entity
                .get_field(&update.field)
                .ok_or_else(|| invalid(format!("unknown field '{}'", update.field)))?;
            if def.name == entity.identity_field {
                return Err(invalid(format!("identity '{}' cannot be updated", def.name)));
            }
            if assignments.iter().any(|a| a.field == def.name) {
                return Err(invalid(format!("field '{}' updated twice", def.name)));
            }

            let delta = match &update.delta {
                FieldDelta::Set(value) => {
                    let value = def.coerce(value).map_err(invalid)?;
                    self.reference_checks(entity, &def.name, &value, &mut steps);
                    FieldDelta::Set(value)
                }
                arithmetic => {
                    let scalar = def
                        .field_type
                        .scalar_type()
                        .filter(ScalarType::is_numeric)
                        .ok_or_else(|| {
                            invalid(format!(
                                "cannot apply arithmetic to {} field '{}'",
                                def.field_type.name(),
                                def.name
                            ))
                        })?;
                    let operand = arithmetic.operand();
                    if operand.is_null() {
                        return Err(invalid(format!("null operand for '{}'", def.name)));
                    }
                    let operand = scalar
                        .coerce(operand)
                        .map_err(|e| invalid(format!("field '{}': {e}", def.name)))?;
                    if matches!(arithmetic, FieldDelta::Divide(_))
                        && operand.as_f64().is_some_and(|v| v == 0.0)
                    {
                        return Err(invalid(format!("division by zero on '{}'", def.name)));
                    }
                    with_operand(arithmetic, operand)
                }
            };
            assignments.push(Assignment {
                field: def.name.clone(),
                delta,
            });
        }

        steps.push(WriteStep::Update {
            entity: entity.name.clone(),
            predicate,
            assignments,
            target,
        });
        Ok(steps)
    }

    // ---- delete ----

    fn plan_delete(
        &self,
        entity: &EntityDef,
        predicate: PredicatePlan,
        target: Target,
    ) -> Result<Vec<WriteStep>, Error> {
        let mut steps = Vec::new();
        self.plan_delete_at(&entity.name, predicate, target, 0, &mut steps)?;
        Ok(steps)
    }

    /// Emit referential actions for rows of `entity` matching `predicate`,
    /// then the delete itself. Actions run first since their predicates
    /// correlate with the rows about to be removed.
    ///
    /// Cascades are expanded one level per recursion, cycles included, up to
    /// `max_depth` levels below the deleted records. Past that a
    /// [`WriteStep::CascadeLimit`] guard fails the write if any record still
    /// references the last expanded level.
    fn plan_delete_at(
        &self,
        entity: &str,
        predicate: PredicatePlan,
        target: Target,
        depth: usize,
        steps: &mut Vec<WriteStep>,
    ) -> Result<(), Error> {
        for fk in self.registry.foreign_keys_referencing(entity) {
            let referencing = PredicatePlan::exists(
                JoinKeys {
                    local_field: fk.key_field.clone(),
                    target_entity: entity.to_string(),
                    target_field: fk.referenced_field.clone(),
                },
                predicate.clone(),
            );

            match fk.on_delete {
                DeleteBehavior::Restrict => steps.push(WriteStep::RequireAbsent {
                    entity: fk.holder.clone(),
                    predicate: referencing,
                    reason: format!(
                        "{} records reference {} through '{}'",
                        fk.holder, entity, fk.key_field
                    ),
                }),
                DeleteBehavior::Cascade if depth >= self.config.max_depth => {
                    steps.push(WriteStep::CascadeLimit {
                        entity: fk.holder.clone(),
                        predicate: referencing,
                        depth: depth + 1,
                        max: self.config.max_depth,
                    });
                }
                DeleteBehavior::Cascade => {
                    self.plan_delete_at(
                        &fk.holder,
                        referencing,
                        Target::Cascade,
                        depth + 1,
                        steps,
                    )?;
                }
                DeleteBehavior::SetNull => {
                    let holder = self.registry.resolve(&fk.holder)?;
                    let nullable = holder.get_field(&fk.key_field).is_some_and(|f| f.nullable);
                    if !nullable {
                        return Err(Error::InvalidSchema(format!(
                            "{}.{} uses set-null on delete but is not nullable",
                            fk.holder, fk.key_field
                        )));
                    }
                    steps.push(WriteStep::Update {
                        entity: fk.holder.clone(),
                        predicate: referencing,
                        assignments: vec![Assignment {
                            field: fk.key_field.clone(),
                            delta: FieldDelta::Set(Value::Null),
                        }],
                        target: Target::Cascade,
                    });
                }
            }
        }

        steps.push(WriteStep::Delete {
            entity: entity.to_string(),
            predicate,
            target,
        });
        Ok(())
    }
}

fn identity_def(entity: &EntityDef) -> Result<&FieldDef, Error> {
    entity.get_identity_field().ok_or_else(|| {
        Error::InvalidSchema(format!(
            "{} has no identity field '{}'",
            entity.name, entity.identity_field
        ))
    })
}

fn with_operand(delta: &FieldDelta, operand: Value) -> FieldDelta {
    match delta {
        FieldDelta::Set(_) => FieldDelta::Set(operand),
        FieldDelta::Increment(_) => FieldDelta::Increment(operand),
        FieldDelta::Decrement(_) => FieldDelta::Decrement(operand),
        FieldDelta::Multiply(_) => FieldDelta::Multiply(operand),
        FieldDelta::Divide(_) => FieldDelta::Divide(operand),
    }
}

/// Kahn's algorithm over `count` nodes; ties go to the lowest index.
pub(crate) fn topological_order(count: usize, edges: &[(usize, usize)]) -> Result<Vec<usize>, Error> {
    let mut indegree = vec![0usize; count];
    let mut outgoing: Vec<Vec<usize>> = vec![Vec::new(); count];
    let mut seen = HashSet::new();
    for &(before, after) in edges {
        if seen.insert((before, after)) {
            indegree[after] += 1;
            outgoing[before].push(after);
        }
    }

    let mut ready: BTreeSet<usize> = (0..count).filter(|&n| indegree[n] == 0).collect();
    let mut order = Vec::with_capacity(count);
    while let Some(next) = ready.pop_first() {
        order.push(next);
        for &after in &outgoing[next] {
            indegree[after] -= 1;
            if indegree[after] == 0 {
                ready.insert(after);
            }
        }
    }

    if order.len() != count {
        return Err(Error::Validation("dependency cycle".to_string()));
    }
    Ok(order)
}
