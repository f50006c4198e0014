//! Read side of the engine.
//!
//! Filters resolve into [`PredicatePlan`]s, pagination arguments into
//! [`WindowDirective`]s, and read shapes into [`FetchPlan`]s that the
//! [`QueryExecutor`] runs against a store.

mod executor;
mod filter;
mod pagination;
mod planner;

pub use executor::QueryExecutor;
pub use filter::{
    compare_values, leaf_matches, sort_compare, values_equal, FilterResolver, JoinKey, JoinKeys,
    LeafPredicate, PredicateEvaluator, PredicatePlan, PreparedPredicate, RowSource,
};
pub use pagination::{
    apply_window, resolve_ordering, CursorCodec, CursorDirection, PaginationPlanner,
    WindowDirective, WindowMode,
};
pub use planner::{FetchPlan, FetchStep, ParentLink, TraversalPlanner};
