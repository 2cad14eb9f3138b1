use owo_colors::OwoColorize;
use tabled::settings::Style;
use tabled::{Table, Tabled};

use super::execute::print_report;
use super::print_json;
use crate::bridge::Bridge;
use crate::cli::OutputOptions;
use crate::error::Result;
use crate::sync::{OperationStatus, SyncOperation};

#[derive(Tabled)]
struct OperationRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Tickets")]
    tickets: usize,
    #[tabled(rename = "Created")]
    created: String,
    #[tabled(rename = "Summary")]
    summary: String,
}

fn colored_status(status: OperationStatus) -> String {
    match status {
        OperationStatus::Completed => status.green().to_string(),
        OperationStatus::Failed => status.red().to_string(),
        OperationStatus::RolledBack => status.cyan().to_string(),
        OperationStatus::Pending | OperationStatus::Running => status.yellow().to_string(),
    }
}

fn summary_of(op: &SyncOperation) -> String {
    op.result
        .get("summary")
        .or_else(|| op.result.get("error"))
        .and_then(|v| v.as_str())
        .unwrap_or("-")
        .to_string()
}

/// List recent operations
pub fn cmd_history(bridge: &Bridge, limit: usize, output: OutputOptions) -> Result<()> {
    let operations = bridge.sync_history(limit)?;
    if output.json {
        return print_json(&operations);
    }
    if operations.is_empty() {
        println!("No sync operations yet.");
        return Ok(());
    }

    let rows: Vec<OperationRow> = operations
        .iter()
        .map(|op| OperationRow {
            id: op.id.clone(),
            kind: op.kind.to_string(),
            status: colored_status(op.status),
            tickets: op.ticket_ids.len(),
            created: op.created_at.strftime("%Y-%m-%d %H:%M:%S").to_string(),
            summary: summary_of(op),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
    Ok(())
}

/// Undo an operation
pub async fn cmd_rollback(bridge: &Bridge, operation_id: &str, output: OutputOptions) -> Result<()> {
    let report = bridge.rollback(operation_id).await?;
    if !output.json {
        println!("{} {}", "Rolled back".green(), operation_id);
    }
    print_report(&report, output)
}
