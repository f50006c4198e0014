//! Fetch plan execution.
//!
//! The executor runs the root fetch with its window, then resolves every
//! dependent step with a single batched fetch keyed by the parent rows' join
//! values. Related rows are grouped per parent and windowed per group before
//! the record tree is assembled.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use super::filter::JoinKey;
use super::pagination::{apply_window, CursorCodec};
use super::planner::{FetchPlan, FetchStep};
use crate::error::Error;
use crate::storage::{FetchRequest, KeyFilter, StorageBackend};
use quarry_proto::{ReadResult, RecordNode, Row, Value};

/// Rows of a dependent step grouped by join key.
type Groups = HashMap<JoinKey, Vec<Row>>;

/// Runs fetch plans against a store.
pub struct QueryExecutor<'a, S: StorageBackend + ?Sized> {
    storage: &'a S,
}

impl<'a, S: StorageBackend + ?Sized> QueryExecutor<'a, S> {
    /// Create an executor over a store.
    pub fn new(storage: &'a S) -> Self {
        Self { storage }
    }

    /// Execute a plan.
    pub async fn execute(&self, plan: &FetchPlan) -> Result<ReadResult, Error> {
        let root = plan.root();
        let request = FetchRequest::new(root.entity.name.clone(), root.predicate.clone())
            .with_window(root.window.clone());
        let mut root_rows = self.storage.execute_read(&request).await?;
        root.window.restore_order(&mut root_rows);
        debug!(entity = %root.entity.name, rows = root_rows.len(), "fetched root rows");

        // Rows reached by each step, and the per-parent groups of dependent steps.
        let mut reached: Vec<Vec<Row>> = vec![Vec::new(); plan.steps.len()];
        let mut groups: Vec<Groups> = vec![Groups::new(); plan.steps.len()];
        reached[0] = root_rows;

        for step in plan.steps.iter().skip(1) {
            let Some(link) = &step.parent else { continue };
            let (rows, grouped) = self
                .fetch_dependent(step, &link.parent_field, &link.child_field, &reached[link.step])
                .await?;
            reached[step.index] = rows;
            groups[step.index] = grouped;
        }

        let ordering = &root.window.ordering;
        let start_cursor = reached[0]
            .first()
            .map(|row| CursorCodec::encode(&root.entity.name, ordering, row))
            .transpose()?;
        let end_cursor = reached[0]
            .last()
            .map(|row| CursorCodec::encode(&root.entity.name, ordering, row))
            .transpose()?;

        let records = reached[0]
            .iter()
            .map(|row| assemble(plan, &groups, root, row))
            .collect();

        Ok(ReadResult {
            records,
            start_cursor,
            end_cursor,
        })
    }

    async fn fetch_dependent(
        &self,
        step: &FetchStep,
        parent_field: &str,
        child_field: &str,
        parents: &[Row],
    ) -> Result<(Vec<Row>, Groups), Error> {
        let mut seen = HashSet::new();
        let values: Vec<Value> = parents
            .iter()
            .filter_map(|row| row.get(parent_field))
            .filter(|value| JoinKey::of(value).is_some_and(|key| seen.insert(key)))
            .cloned()
            .collect();
        if values.is_empty() {
            return Ok((Vec::new(), Groups::new()));
        }

        let key_count = values.len();
        let request = FetchRequest::new(step.entity.name.clone(), step.predicate.clone())
            .with_key_filter(KeyFilter {
                field: child_field.to_string(),
                values,
            });
        let rows = self.storage.execute_read(&request).await?;
        debug!(
            path = %step.path,
            keys = key_count,
            rows = rows.len(),
            "fetched related rows"
        );

        let mut grouped = Groups::new();
        for row in rows {
            if let Some(key) = row.get(child_field).and_then(JoinKey::of) {
                grouped.entry(key).or_default().push(row);
            }
        }

        let mut reached = Vec::new();
        for group in grouped.values_mut() {
            let mut window = apply_window(std::mem::take(group), &step.window);
            step.window.restore_order(&mut window);
            reached.extend(window.iter().cloned());
            *group = window;
        }
        Ok((reached, grouped))
    }
}

/// Build the record tree rooted at `row` of `step`.
fn assemble(plan: &FetchPlan, groups: &[Groups], step: &FetchStep, row: &Row) -> RecordNode {
    let mut node = RecordNode::new(row.project(&step.fields));
    for child in plan.children_of(step.index) {
        let Some(link) = &child.parent else { continue };
        let related = row
            .get(&link.parent_field)
            .and_then(JoinKey::of)
            .and_then(|key| groups[child.index].get(&key))
            .map(|rows| {
                rows.iter()
                    .map(|r| assemble(plan, groups, child, r))
                    .collect()
            })
            .unwrap_or_default();
        node.relations.insert(link.relation.clone(), related);
    }
    node
}
