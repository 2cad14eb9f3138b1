use owo_colors::OwoColorize;
use tabled::settings::Style;
use tabled::{Table, Tabled};

use super::{colored_outcome, or_dash, print_json};
use crate::bridge::Bridge;
use crate::cli::OutputOptions;
use crate::error::Result;
use crate::sync::{DeleteScope, OperationKind, SyncReport};

#[derive(Tabled)]
struct OutcomeRow {
    #[tabled(rename = "Ticket")]
    ticket: String,
    #[tabled(rename = "Result")]
    status: String,
    #[tabled(rename = "Counterpart")]
    counterpart: String,
    #[tabled(rename = "Details")]
    details: String,
}

/// Run a sync, create or delete batch. Without ids, sync and create act on
/// every candidate the analysis proposes.
pub async fn cmd_execute(
    bridge: &Bridge,
    kind: OperationKind,
    mut ids: Vec<String>,
    delete_scope: DeleteScope,
    output: OutputOptions,
) -> Result<()> {
    if ids.is_empty() {
        let analysis = bridge.analyze(None).await?;
        ids = match kind {
            OperationKind::Create => analysis.create_candidates(),
            _ => analysis.sync_candidates(),
        };
        if ids.is_empty() {
            if output.json {
                return print_json(&serde_json::json!({ "operation": null, "outcomes": [] }));
            }
            println!("{}", "Nothing to do.".green());
            return Ok(());
        }
    }

    let report = bridge.execute(kind, ids, delete_scope).await?;
    print_report(&report, output)
}

pub(super) fn print_report(report: &SyncReport, output: OutputOptions) -> Result<()> {
    if output.json {
        return print_json(report);
    }

    if !report.outcomes.is_empty() {
        let rows: Vec<OutcomeRow> = report
            .outcomes
            .iter()
            .map(|o| OutcomeRow {
                ticket: o.ticket_id.clone(),
                status: colored_outcome(o.status),
                counterpart: or_dash(o.counterpart_id.as_deref()),
                details: or_dash(o.message.as_deref()),
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
    }

    let op = &report.operation;
    println!(
        "{} {} ({}): {}",
        op.kind.to_string().bold(),
        op.id.dimmed(),
        op.status,
        report.summary
    );
    Ok(())
}
