//! Pagination planning and cursor tokens.
//!
//! The planner turns caller-supplied [`PaginationArgs`] plus an ordering into
//! a [`WindowDirective`]: the bounded result window a fetch must produce.
//! Cursors are opaque tokens carrying the ordering key of a boundary record,
//! so resolving one never touches storage.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use super::filter::sort_compare;
use crate::catalog::EntityDef;
use crate::error::Error;
use quarry_proto::{OrderDirection, OrderSpec, PaginationArgs, Row, Value};

/// Length of the integrity tag appended to cursor tokens, in hex characters.
const CURSOR_TAG_LEN: usize = 16;

/// A bounded result window.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowDirective {
    /// Total ordering of the window, identity last.
    pub ordering: Vec<OrderSpec>,
    /// How the window is cut from the ordered rows.
    pub mode: WindowMode,
}

/// How a window is selected.
#[derive(Debug, Clone, PartialEq)]
pub enum WindowMode {
    /// Skip `skip` rows, then return at most `limit` (None = all).
    Offset { skip: u64, limit: Option<u64> },
    /// Return at most `limit` rows strictly beyond a boundary key.
    Cursor {
        boundary: Vec<Value>,
        direction: CursorDirection,
        limit: Option<u64>,
    },
}

/// Which side of a cursor boundary to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorDirection {
    /// Rows after the boundary, emitted in ordering.
    Forward,
    /// Rows before the boundary, emitted nearest-first (reverse ordering).
    Backward,
}

impl WindowDirective {
    /// The whole ordered set.
    pub fn unbounded(ordering: Vec<OrderSpec>) -> Self {
        Self {
            ordering,
            mode: WindowMode::Offset {
                skip: 0,
                limit: None,
            },
        }
    }

    /// Maximum number of rows the window yields.
    pub fn limit(&self) -> Option<u64> {
        match &self.mode {
            WindowMode::Offset { limit, .. } | WindowMode::Cursor { limit, .. } => *limit,
        }
    }

    /// Check if rows arrive in reverse ordering.
    pub fn is_backward(&self) -> bool {
        matches!(
            self.mode,
            WindowMode::Cursor {
                direction: CursorDirection::Backward,
                ..
            }
        )
    }

    /// Put rows emitted for this window back into forward ordering.
    pub fn restore_order(&self, rows: &mut [Row]) {
        if self.is_backward() {
            rows.reverse();
        }
    }

    /// Compare two rows under the window ordering.
    pub fn compare_rows(&self, a: &Row, b: &Row) -> Ordering {
        for spec in &self.ordering {
            let left = a.get(&spec.field).unwrap_or(&Value::Null);
            let right = b.get(&spec.field).unwrap_or(&Value::Null);
            let ord = directed(sort_compare(left, right), spec.direction);
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }

    /// Compare a row against a boundary key under the window ordering.
    pub fn compare_to_boundary(&self, row: &Row, boundary: &[Value]) -> Ordering {
        for (spec, bound) in self.ordering.iter().zip(boundary) {
            let value = row.get(&spec.field).unwrap_or(&Value::Null);
            let ord = directed(sort_compare(value, bound), spec.direction);
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }

    /// The ordering key of a row.
    pub fn key_of(&self, row: &Row) -> Vec<Value> {
        self.ordering
            .iter()
            .map(|spec| row.get(&spec.field).cloned().unwrap_or(Value::Null))
            .collect()
    }
}

fn directed(ord: Ordering, direction: OrderDirection) -> Ordering {
    match direction {
        OrderDirection::Asc => ord,
        OrderDirection::Desc => ord.reverse(),
    }
}

/// Apply a window to rows, ordering them first.
///
/// Output follows the store contract: ordering for offset and forward
/// windows, reverse ordering for backward windows.
pub fn apply_window(mut rows: Vec<Row>, directive: &WindowDirective) -> Vec<Row> {
    rows.sort_by(|a, b| directive.compare_rows(a, b));
    let cap = |limit: Option<u64>| limit.map(|l| l as usize).unwrap_or(usize::MAX);

    match &directive.mode {
        WindowMode::Offset { skip, limit } => rows
            .into_iter()
            .skip(*skip as usize)
            .take(cap(*limit))
            .collect(),
        WindowMode::Cursor {
            boundary,
            direction: CursorDirection::Forward,
            limit,
        } => rows
            .into_iter()
            .filter(|row| directive.compare_to_boundary(row, boundary) == Ordering::Greater)
            .take(cap(*limit))
            .collect(),
        WindowMode::Cursor {
            boundary,
            direction: CursorDirection::Backward,
            limit,
        } => rows
            .into_iter()
            .rev()
            .filter(|row| directive.compare_to_boundary(row, boundary) == Ordering::Less)
            .take(cap(*limit))
            .collect(),
    }
}

/// Plans result windows.
pub struct PaginationPlanner {
    max_take: Option<u64>,
}

impl PaginationPlanner {
    /// Create a planner with an optional upper bound on `take`.
    pub fn new(max_take: Option<u64>) -> Self {
        Self { max_take }
    }

    /// Resolve ordering and pagination for a read of `entity`.
    pub fn plan(
        &self,
        entity: &EntityDef,
        order_by: &[OrderSpec],
        args: Option<&PaginationArgs>,
    ) -> Result<WindowDirective, Error> {
        let ordering = resolve_ordering(entity, order_by)?;
        let Some(args) = args else {
            return Ok(WindowDirective::unbounded(ordering));
        };

        let cursor = match (&args.after, &args.before) {
            (Some(_), Some(_)) => {
                return Err(Error::InvalidPagination(
                    "'after' and 'before' cannot be combined".to_string(),
                ))
            }
            (Some(token), None) => Some((token, CursorDirection::Forward)),
            (None, Some(token)) => Some((token, CursorDirection::Backward)),
            (None, None) => None,
        };
        if cursor.is_some() && args.skip.is_some() {
            return Err(Error::InvalidPagination(
                "offset and cursor pagination cannot be combined".to_string(),
            ));
        }

        let skip = non_negative("skip", args.skip)?.unwrap_or(0);
        let limit = non_negative("take", args.take)?;
        if let (Some(take), Some(max)) = (limit, self.max_take) {
            if take > max {
                return Err(Error::InvalidPagination(format!(
                    "take {take} exceeds maximum {max}"
                )));
            }
        }

        let mode = match cursor {
            None => WindowMode::Offset { skip, limit },
            Some((token, direction)) => WindowMode::Cursor {
                boundary: CursorCodec::decode(token, entity, &ordering)?,
                direction,
                limit,
            },
        };
        Ok(WindowDirective { ordering, mode })
    }
}

fn non_negative(name: &str, value: Option<i64>) -> Result<Option<u64>, Error> {
    match value {
        Some(v) if v < 0 => Err(Error::InvalidPagination(format!(
            "{name} must be non-negative, got {v}"
        ))),
        Some(v) => Ok(Some(v as u64)),
        None => Ok(None),
    }
}

/// Validate an ordering and make it total by appending the identity.
pub fn resolve_ordering(entity: &EntityDef, order_by: &[OrderSpec]) -> Result<Vec<OrderSpec>, Error> {
    let mut ordering = Vec::with_capacity(order_by.len() + 1);
    for spec in order_by {
        if entity.get_field(&spec.field).is_none() {
            return Err(Error::Validation(format!(
                "cannot order {} by unknown field '{}'",
                entity.name, spec.field
            )));
        }
        if !ordering.iter().any(|o: &OrderSpec| o.field == spec.field) {
            ordering.push(spec.clone());
        }
    }
    if !ordering.iter().any(|o| o.field == entity.identity_field) {
        ordering.push(OrderSpec::asc(entity.identity_field.clone()));
    }
    Ok(ordering)
}

#[derive(Serialize, Deserialize)]
struct CursorPayload {
    entity: String,
    fields: Vec<String>,
    key: Vec<Value>,
}

/// Encodes and decodes cursor tokens.
///
/// A token is the hex-encoded JSON payload, a `.`, and a truncated blake3
/// hash of the payload.
pub struct CursorCodec;

impl CursorCodec {
    /// Build the cursor for a row read under `ordering`.
    pub fn encode(entity: &str, ordering: &[OrderSpec], row: &Row) -> Result<String, Error> {
        let payload = CursorPayload {
            entity: entity.to_string(),
            fields: ordering.iter().map(|o| o.field.clone()).collect(),
            key: ordering
                .iter()
                .map(|o| row.get(&o.field).cloned().unwrap_or(Value::Null))
                .collect(),
        };
        if let Some(v) = payload
            .key
            .iter()
            .find(|v| v.as_f64().is_some_and(|f| !f.is_finite()))
        {
            return Err(Error::Serialization(format!(
                "cursor for {entity}: cannot encode {v}"
            )));
        }
        let json = serde_json::to_vec(&payload)
            .map_err(|e| Error::Serialization(format!("cursor for {entity}: {e}")))?;
        Ok(format!("{}.{}", hex::encode(&json), tag(&json)))
    }

    /// Decode a token into boundary values typed for `ordering`.
    pub fn decode(token: &str, entity: &EntityDef, ordering: &[OrderSpec]) -> Result<Vec<Value>, Error> {
        let invalid = |msg: &str| Error::InvalidCursor(msg.to_string());

        let (body, token_tag) = token
            .split_once('.')
            .ok_or_else(|| invalid("malformed token"))?;
        let json = hex::decode(body).map_err(|_| invalid("malformed token"))?;
        if tag(&json) != token_tag {
            return Err(invalid("integrity check failed"));
        }
        let payload: CursorPayload =
            serde_json::from_slice(&json).map_err(|_| invalid("malformed payload"))?;

        if payload.entity != entity.name {
            return Err(Error::InvalidCursor(format!(
                "cursor belongs to {}, not {}",
                payload.entity, entity.name
            )));
        }
        let expected: Vec<&str> = ordering.iter().map(|o| o.field.as_str()).collect();
        if payload.fields != expected || payload.key.len() != expected.len() {
            return Err(invalid("cursor does not match the requested ordering"));
        }

        expected
            .iter()
            .zip(&payload.key)
            .map(|(field, value)| {
                let def = entity
                    .get_field(field)
                    .ok_or_else(|| invalid("cursor references unknown field"))?;
                def.coerce(value).map_err(Error::InvalidCursor)
            })
            .collect()
    }
}

fn tag(payload: &[u8]) -> String {
    let hash = blake3::hash(payload);
    hash.to_hex()[..CURSOR_TAG_LEN].to_string()
}
