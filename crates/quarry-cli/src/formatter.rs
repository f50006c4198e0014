//! Output formatters for engine results.

use clap::ValueEnum;
use comfy_table::{Cell, Table};
use quarry_proto::{MutationResult, ReadResult, RecordNode, TransactionResult, Value};

/// Output format for results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// ASCII table format
    Table,
    /// JSON format
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Table => write!(f, "table"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// Trait for formatting output.
pub trait Formatter: Send + Sync {
    /// Format a read result.
    fn format_read(&self, result: &ReadResult) -> String;

    /// Format a mutation result.
    fn format_mutation(&self, result: &MutationResult) -> String;

    /// Format a transaction result.
    fn format_transaction(&self, result: &TransactionResult) -> String;

    /// Format a rendered plan.
    fn format_plan(&self, plan: &str) -> String;
}

/// Create a formatter for the given output format.
pub fn create_formatter(format: OutputFormat) -> Box<dyn Formatter> {
    match format {
        OutputFormat::Table => Box::new(TableFormatter),
        OutputFormat::Json => Box::new(JsonFormatter),
    }
}

/// Table formatter using comfy-table.
pub struct TableFormatter;

impl Formatter for TableFormatter {
    fn format_read(&self, result: &ReadResult) -> String {
        if result.is_empty() {
            return "No results".to_string();
        }

        let mut output = format!("{}\n{} row(s)", records_table(&result.records), result.len());
        if let Some(cursor) = &result.end_cursor {
            output.push_str(&format!("\nend cursor: {cursor}"));
        }
        output
    }

    fn format_mutation(&self, result: &MutationResult) -> String {
        let mut output = format!("{} row(s) affected", result.affected);
        if result.cascaded > 0 {
            output.push_str(&format!(", {} by referential actions", result.cascaded));
        }
        if !result.generated_ids.is_empty() {
            let ids: Vec<String> = result.generated_ids.iter().map(format_value).collect();
            output.push_str(&format!("\ncreated: {}", ids.join(", ")));
        }
        output
    }

    fn format_transaction(&self, result: &TransactionResult) -> String {
        let mut table = Table::new();
        table.set_header(vec!["step", "affected", "cascaded", "created"]);
        for step in &result.steps {
            table.add_row(vec![
                Cell::new(&step.label),
                Cell::new(step.result.affected),
                Cell::new(step.result.cascaded),
                Cell::new(step.result.generated_ids.len()),
            ]);
        }
        format!("{}\n{} step(s) committed", table, result.steps.len())
    }

    fn format_plan(&self, plan: &str) -> String {
        plan.trim_end().to_string()
    }
}

/// JSON formatter.
pub struct JsonFormatter;

impl Formatter for JsonFormatter {
    fn format_read(&self, result: &ReadResult) -> String {
        to_json(result)
    }

    fn format_mutation(&self, result: &MutationResult) -> String {
        to_json(result)
    }

    fn format_transaction(&self, result: &TransactionResult) -> String {
        to_json(result)
    }

    fn format_plan(&self, plan: &str) -> String {
        serde_json::json!({ "plan": plan.trim_end() }).to_string()
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| serde_json::json!({ "error": e.to_string() }).to_string())
}

/// Render records as a table: scalar columns in first-seen order, then one
/// count column per relation.
fn records_table(records: &[RecordNode]) -> Table {
    let mut columns: Vec<&str> = Vec::new();
    let mut relations: Vec<&str> = Vec::new();
    for record in records {
        for (name, _) in &record.values.fields {
            if !columns.contains(&name.as_str()) {
                columns.push(name);
            }
        }
        for name in record.relations.keys() {
            if !relations.contains(&name.as_str()) {
                relations.push(name);
            }
        }
    }

    let mut table = Table::new();
    let mut headers: Vec<Cell> = columns.iter().map(Cell::new).collect();
    headers.extend(relations.iter().map(Cell::new));
    table.set_header(headers);

    for record in records {
        let mut cells: Vec<Cell> = columns
            .iter()
            .map(|c| Cell::new(record.get(c).map(format_value).unwrap_or_default()))
            .collect();
        cells.extend(
            relations
                .iter()
                .map(|r| Cell::new(format!("<{} related>", record.related(r).len()))),
        );
        table.add_row(cells);
    }
    table
}

/// Format a Value as a display string.
fn format_value(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => s.clone(),
        Value::Bytes(b) => format!("<{} bytes>", b.len()),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_proto::{Row, StepResult};

    fn result() -> ReadResult {
        let mut author = RecordNode::new(Row::new().with("id", 1_i64).with("name", "Ada"));
        author.relations.insert(
            "posts".to_string(),
            vec![RecordNode::new(Row::new().with("title", "one"))],
        );
        ReadResult {
            records: vec![author, RecordNode::new(Row::new().with("id", 2_i64).with("name", Value::Null))],
            start_cursor: None,
            end_cursor: Some("abc".to_string()),
        }
    }

    #[test]
    fn test_format_value() {
        let bytes = [
            0x12, 0x3e, 0x45, 0x67, 0xe8, 0x9b, 0x12, 0xd3, 0xa4, 0x56, 0x42, 0x66, 0x14, 0x17,
            0x40, 0x00,
        ];
        assert_eq!(format_value(&Value::Uuid(bytes)), "123e4567-e89b-12d3-a456-426614174000");
        assert_eq!(format_value(&Value::Null), "NULL");
        assert_eq!(format_value(&Value::Bytes(vec![1, 2])), "<2 bytes>");
    }

    #[test]
    fn test_table_read() {
        let output = TableFormatter.format_read(&result());
        assert!(output.contains("Ada"));
        assert!(output.contains("<1 related>"));
        assert!(output.contains("<0 related>"));
        assert!(output.ends_with("2 row(s)\nend cursor: abc"));
        assert_eq!(TableFormatter.format_read(&ReadResult::default()), "No results");
    }

    #[test]
    fn test_table_mutation() {
        let mut result = MutationResult::affected(1);
        result.cascaded = 2;
        result.generated_ids = vec![Value::Int64(7)];
        assert_eq!(
            TableFormatter.format_mutation(&result),
            "1 row(s) affected, 2 by referential actions\ncreated: 7"
        );
    }

    #[test]
    fn test_json_output() {
        let json: serde_json::Value =
            serde_json::from_str(&JsonFormatter.format_read(&result())).unwrap();
        assert_eq!(json["records"][0]["values"]["name"], "Ada");
        assert_eq!(json["end_cursor"], "abc");

        let tx = TransactionResult {
            steps: vec![StepResult {
                label: "a".to_string(),
                result: MutationResult::affected(3),
            }],
        };
        let json: serde_json::Value =
            serde_json::from_str(&JsonFormatter.format_transaction(&tx)).unwrap();
        assert_eq!(json["steps"][0]["result"]["affected"], 3);
    }
}
