//! Write side of the engine: mutation planning, execution and
//! multi-step transactions.

mod executor;
mod planner;
mod transaction;

pub use executor::{execute_atomic, MutationExecutor};
pub use planner::{Binding, InsertStep, MutationPlan, MutationPlanner, Target, WriteStep};
pub use transaction::{PlannedStep, PlannedTransaction, TransactionCoordinator};
