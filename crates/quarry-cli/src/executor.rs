//! Request execution.

use crate::formatter::Formatter;
use quarry_core::storage::StorageBackend;
use quarry_core::Engine;
use quarry_proto::Request;
use thiserror::Error;
use tracing::debug;

/// Execution errors.
#[derive(Debug, Error)]
pub enum ExecuteError {
    /// The request document could not be decoded.
    #[error("{0}")]
    Request(#[from] quarry_proto::Error),

    /// The engine rejected or failed the request.
    #[error("{0}")]
    Engine(#[from] quarry_core::Error),
}

/// Execute one JSON request document and return formatted output.
///
/// With `explain` set the request is only planned and the plan is printed.
pub async fn execute<S: StorageBackend>(
    engine: &Engine<S>,
    input: &str,
    formatter: &dyn Formatter,
    explain: bool,
) -> Result<String, ExecuteError> {
    let request = Request::from_json(input)?;
    debug!(explain, "decoded request");

    if explain {
        let plan = match &request {
            Request::Read(query) => engine.plan_read(query)?.to_string(),
            Request::Mutate(mutation) => engine.plan_mutation(mutation)?.to_string(),
            Request::Transaction(plan) => {
                let planned = engine.plan_transaction(plan)?;
                planned
                    .steps
                    .iter()
                    .map(|step| format!("[{}] {}", step.label, step.plan))
                    .collect::<Vec<_>>()
                    .join("")
            }
        };
        return Ok(formatter.format_plan(&plan));
    }

    match &request {
        Request::Read(query) => {
            let result = engine.read_query(query).await?;
            Ok(formatter.format_read(&result))
        }
        Request::Mutate(mutation) => {
            let result = engine.mutate(mutation).await?;
            Ok(formatter.format_mutation(&result))
        }
        Request::Transaction(plan) => {
            let result = engine.run_transaction(plan).await?;
            Ok(formatter.format_transaction(&result))
        }
    }
}
