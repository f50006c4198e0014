//! Relation traversal planning.
//!
//! The planner resolves a [`ReadQuery`] against the schema registry and
//! flattens its shape into a [`FetchPlan`]: the root fetch followed by one
//! batched fetch per requested relation, in depth-first request order.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use super::filter::{FilterResolver, PredicatePlan};
use super::pagination::{PaginationPlanner, WindowDirective};
use crate::catalog::{Cardinality, EntityDef, SchemaRegistry};
use crate::config::EngineConfig;
use crate::error::Error;
use quarry_proto::{FilterExpr, OrderSpec, PaginationArgs, ReadQuery, ReadShape};

/// An executable read plan.
#[derive(Debug, Clone)]
pub struct FetchPlan {
    /// Root step first, then dependent steps; parents precede children.
    pub steps: Vec<FetchStep>,
}

impl FetchPlan {
    /// The root fetch.
    pub fn root(&self) -> &FetchStep {
        &self.steps[0]
    }

    /// Steps fetched from the given parent step.
    pub fn children_of(&self, step: usize) -> impl Iterator<Item = &FetchStep> {
        self.steps
            .iter()
            .filter(move |s| s.parent.as_ref().is_some_and(|p| p.step == step))
    }

    /// Depth of the deepest step.
    pub fn depth(&self) -> usize {
        self.steps.iter().map(|s| s.depth).max().unwrap_or(0)
    }
}

impl fmt::Display for FetchPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for step in &self.steps {
            let indent = "  ".repeat(step.depth);
            let label = if step.path.is_empty() {
                step.entity.name.clone()
            } else {
                format!("{} -> {}", step.path, step.entity.name)
            };
            write!(f, "{indent}{label}")?;
            if let Some(parent) = &step.parent {
                write!(
                    f,
                    " [{} in parent.{}]",
                    parent.child_field, parent.parent_field
                )?;
            }
            if !step.predicate.is_always() {
                write!(f, " where {}", step.predicate)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// One fetch in a plan.
#[derive(Debug, Clone)]
pub struct FetchStep {
    /// Position in the plan.
    pub index: usize,
    /// Dotted relation path from the root ("" for the root).
    pub path: String,
    /// Entity fetched.
    pub entity: Arc<EntityDef>,
    /// Fields returned to the caller.
    pub fields: Vec<String>,
    /// Filter on fetched rows.
    pub predicate: PredicatePlan,
    /// Window, applied per parent record for dependent steps.
    pub window: WindowDirective,
    /// Link to the parent step; None for the root.
    pub parent: Option<ParentLink>,
    /// Relation depth (0 for the root).
    pub depth: usize,
}

impl FetchStep {
    /// Relation name this step is attached under, if any.
    pub fn relation(&self) -> Option<&str> {
        self.parent.as_ref().map(|p| p.relation.as_str())
    }
}

/// How a dependent step joins to its parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentLink {
    /// Parent step index.
    pub step: usize,
    /// Relation name on the parent entity.
    pub relation: String,
    /// Join field on parent rows.
    pub parent_field: String,
    /// Join field on child rows.
    pub child_field: String,
    /// Number of children per parent.
    pub cardinality: Cardinality,
}

/// Plans relation traversals.
pub struct TraversalPlanner<'a> {
    registry: &'a SchemaRegistry,
    config: &'a EngineConfig,
}

/// Per-level read arguments shared by the root and relation reads.
struct Level<'q> {
    shape: &'q ReadShape,
    filter: Option<&'q FilterExpr>,
    order_by: &'q [OrderSpec],
    pagination: Option<&'q PaginationArgs>,
}

impl<'a> TraversalPlanner<'a> {
    /// Create a planner.
    pub fn new(registry: &'a SchemaRegistry, config: &'a EngineConfig) -> Self {
        Self { registry, config }
    }

    /// Plan a read.
    pub fn plan(&self, query: &ReadQuery) -> Result<FetchPlan, Error> {
        let entity = self.registry.resolve(&query.entity)?;

        let mut steps = Vec::new();
        let root = Level {
            shape: &query.shape,
            filter: query.filter.as_ref(),
            order_by: &query.order_by,
            pagination: query.pagination.as_ref(),
        };
        self.plan_level(entity, root, String::new(), None, 0, &mut steps)?;

        let plan = FetchPlan { steps };
        debug!(
            entity = %query.entity,
            steps = plan.steps.len(),
            depth = plan.depth(),
            "planned read"
        );
        Ok(plan)
    }

    fn plan_level(
        &self,
        entity: Arc<EntityDef>,
        level: Level<'_>,
        path: String,
        parent: Option<ParentLink>,
        depth: usize,
        steps: &mut Vec<FetchStep>,
    ) -> Result<(), Error> {
        if depth > self.config.max_depth {
            return Err(Error::DepthExceeded {
                depth,
                max: self.config.max_depth,
            });
        }

        let fields = if level.shape.fields.is_empty() {
            entity.field_names()
        } else {
            for field in &level.shape.fields {
                if entity.get_field(field).is_none() {
                    return Err(Error::Validation(format!(
                        "unknown field '{}' on entity '{}'",
                        field, entity.name
                    )));
                }
            }
            level.shape.fields.clone()
        };

        let predicate = FilterResolver::new(self.registry, self.config.max_filter_depth)
            .resolve_optional(&entity, level.filter)?;
        let window = PaginationPlanner::new(self.config.max_take).plan(
            &entity,
            level.order_by,
            level.pagination,
        )?;

        let index = steps.len();
        steps.push(FetchStep {
            index,
            path: path.clone(),
            entity: entity.clone(),
            fields,
            predicate,
            window,
            parent,
            depth,
        });

        for (name, read) in &level.shape.relations {
            let relation = entity
                .get_relation(name)
                .ok_or_else(|| Error::unknown_relation(&entity.name, name))?;
            let target = self.registry.resolve(&relation.to_entity)?;

            let child_path = if path.is_empty() {
                name.clone()
            } else {
                format!("{path}.{name}")
            };
            let link = ParentLink {
                step: index,
                relation: name.clone(),
                parent_field: relation.from_field.clone(),
                child_field: relation.to_field.clone(),
                cardinality: relation.cardinality,
            };
            let child = Level {
                shape: &read.shape,
                filter: read.filter.as_ref(),
                order_by: &read.order_by,
                pagination: read.pagination.as_ref(),
            };
            self.plan_level(target, child, child_path, Some(link), depth + 1, steps)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::fixtures::blog_registry;
    use crate::error::ErrorKind;
    use quarry_proto::{OrderSpec, PaginationArgs, RelationRead};

    fn plan(query: &ReadQuery) -> Result<FetchPlan, Error> {
        let registry = blog_registry();
        let config = EngineConfig::default();
        TraversalPlanner::new(&registry, &config).plan(query)
    }

    #[test]
    fn test_root_only() {
        let plan = plan(&ReadQuery::new("User")).unwrap();

        assert_eq!(plan.steps.len(), 1);
        let root = plan.root();
        assert!(root.parent.is_none());
        assert_eq!(root.fields, vec!["id", "email", "name", "age", "role"]);
        assert!(root.predicate.is_always());
        // The identity makes the ordering total.
        assert_eq!(root.window.ordering, vec![OrderSpec::asc("id")]);
    }

    #[test]
    fn test_depth_first_steps() {
        let shape = ReadShape::fields(["name"])
            .with_relation(
                "posts",
                RelationRead::new(
                    ReadShape::fields(["title"])
                        .with_relation("comments", RelationRead::new(ReadShape::all()))
                        .with_relation("author", RelationRead::new(ReadShape::fields(["email"]))),
                ),
            );
        let plan = plan(&ReadQuery::new("User").with_shape(shape)).unwrap();

        let paths: Vec<&str> = plan.steps.iter().map(|s| s.path.as_str()).collect();
        assert_eq!(paths, vec!["", "posts", "posts.author", "posts.comments"]);

        let posts = &plan.steps[1];
        let link = posts.parent.as_ref().unwrap();
        assert_eq!(link.step, 0);
        assert_eq!(link.parent_field, "id");
        assert_eq!(link.child_field, "author_id");
        assert_eq!(link.cardinality, Cardinality::Many);

        let author = &plan.steps[2];
        let link = author.parent.as_ref().unwrap();
        assert_eq!(link.step, 1);
        assert_eq!(link.parent_field, "author_id");
        assert_eq!(link.child_field, "id");
        assert_eq!(author.depth, 2);

        assert_eq!(plan.children_of(1).count(), 2);
        assert_eq!(plan.depth(), 2);
    }

    #[test]
    fn test_relation_level_arguments() {
        let shape = ReadShape::all().with_relation(
            "posts",
            RelationRead::new(ReadShape::all())
                .with_filter(FilterExpr::eq("published", true))
                .with_order(OrderSpec::desc("views"))
                .with_pagination(PaginationArgs::take(2)),
        );
        let plan = plan(&ReadQuery::new("User").with_shape(shape)).unwrap();

        let posts = &plan.steps[1];
        assert_eq!(posts.predicate.leaf_count(), 1);
        assert_eq!(posts.window.limit(), Some(2));
        assert_eq!(
            posts.window.ordering,
            vec![OrderSpec::desc("views"), OrderSpec::asc("id")]
        );
    }

    #[test]
    fn test_cycles_bounded_by_depth() {
        let mut shape = ReadShape::all();
        for _ in 0..4 {
            shape = ReadShape::all().with_relation(
                "posts",
                RelationRead::new(ReadShape::all().with_relation("author", RelationRead::new(shape))),
            );
        }
        let query = ReadQuery::new("User").with_shape(shape);

        let registry = blog_registry();
        let config = EngineConfig::default();
        let plan = TraversalPlanner::new(&registry, &config).plan(&query).unwrap();
        assert_eq!(plan.depth(), 8);

        let config = EngineConfig::default().with_max_depth(5);
        let err = TraversalPlanner::new(&registry, &config).plan(&query).unwrap_err();
        assert!(matches!(err, Error::DepthExceeded { depth: 6, max: 5 }));
    }

    #[test]
    fn test_unknown_names() {
        let err = plan(&ReadQuery::new("Ghost")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownEntity);

        let err = plan(&ReadQuery::new("User").with_shape(ReadShape::fields(["nickname"])))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let shape = ReadShape::all().with_relation("followers", RelationRead::default());
        let err = plan(&ReadQuery::new("User").with_shape(shape)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownRelation);

        let err = plan(&ReadQuery::new("User").with_order(OrderSpec::asc("nickname")))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_display() {
        let shape = ReadShape::all().with_relation(
            "posts",
            RelationRead::new(ReadShape::all()).with_filter(FilterExpr::eq("published", true)),
        );
        let text = plan(&ReadQuery::new("User").with_shape(shape)).unwrap().to_string();

        assert!(text.starts_with("User\n"));
        assert!(text.contains("  posts -> Post [author_id in parent.id] where"));
    }
}
