use owo_colors::OwoColorize;
use tabled::settings::Style;
use tabled::{Table, Tabled};

use super::{or_dash, print_json};
use crate::bridge::Bridge;
use crate::cli::OutputOptions;
use crate::error::Result;
use crate::reconcile::{ReconciliationResult, TicketPair};

#[derive(Tabled)]
struct PairRow {
    #[tabled(rename = "Task")]
    task: String,
    #[tabled(rename = "Issue")]
    issue: String,
    #[tabled(rename = "Title")]
    title: String,
    #[tabled(rename = "Differences")]
    differences: String,
}

impl PairRow {
    fn new(pair: &TicketPair) -> Self {
        let differences = if pair.field_diffs.is_empty() {
            "-".to_string()
        } else {
            pair.field_diffs
                .iter()
                .map(|d| {
                    format!(
                        "{}: {} -> {}",
                        d.field,
                        or_dash(d.actual.as_deref()),
                        or_dash(d.expected.as_deref())
                    )
                })
                .collect::<Vec<_>>()
                .join("; ")
        };
        Self {
            task: pair.task.id.clone(),
            issue: pair.issue.id.clone(),
            title: pair.task.title.clone(),
            differences,
        }
    }
}

#[derive(Tabled)]
struct TicketRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Title")]
    title: String,
    #[tabled(rename = "Column / State")]
    place: String,
}

fn section(title: &str, count: usize) {
    println!("\n{} ({count})", title.bold());
}

fn print_table<T: Tabled>(rows: Vec<T>) {
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}

/// Classify both systems and print the buckets
pub async fn cmd_analyze(
    bridge: &Bridge,
    column: Option<String>,
    all: bool,
    output: OutputOptions,
) -> Result<()> {
    let result = bridge.analyze(column).await?;
    if output.json {
        return print_json(&result);
    }
    print_result(&result, all);
    Ok(())
}

fn print_result(result: &ReconciliationResult, all: bool) {
    let counts = result.counts();
    println!(
        "{} matched, {} mismatched, {} missing, {} orphaned, {} findings",
        counts.matched.to_string().green(),
        counts.mismatched.to_string().yellow(),
        counts.missing.to_string().red(),
        counts.orphaned.to_string().red(),
        counts.findings.to_string().magenta(),
    );

    if all && !result.matched.is_empty() {
        section("Matched", result.matched.len());
        print_table(result.matched.iter().map(PairRow::new).collect());
    }
    if !result.mismatched.is_empty() {
        section("Mismatched", result.mismatched.len());
        print_table(result.mismatched.iter().map(PairRow::new).collect());
    }
    if !result.missing.is_empty() {
        section("Missing in tracker", result.missing.len());
        print_table(
            result
                .missing
                .iter()
                .map(|t| TicketRow {
                    id: t.id.clone(),
                    title: t.title.clone(),
                    place: or_dash(t.column.as_deref()),
                })
                .collect(),
        );
    }
    if !result.orphaned.is_empty() {
        section("Orphaned in tracker", result.orphaned.len());
        print_table(
            result
                .orphaned
                .iter()
                .map(|i| TicketRow {
                    id: i.id.clone(),
                    title: i.title.clone(),
                    place: or_dash(i.state.as_deref()),
                })
                .collect(),
        );
    }
    if !result.findings.is_empty() {
        section("Findings", result.findings.len());
        print_table(
            result
                .findings
                .iter()
                .map(|f| TicketRow {
                    id: f.issue.id.clone(),
                    title: f.issue.title.clone(),
                    place: or_dash(f.issue.state.as_deref()),
                })
                .collect(),
        );
    }

    for ambiguous in &result.ambiguous {
        println!(
            "{} {} matches several tickets: {}",
            "ambiguous:".yellow(),
            ambiguous.ticket_id,
            ambiguous.candidates.join(", ")
        );
    }
    for stale in &result.stale_mappings {
        println!("{} {stale} points at a ticket that no longer exists", "stale:".yellow());
    }
    if !result.ignored.is_empty() || !result.display_only.is_empty() {
        println!(
            "{}",
            format!(
                "{} ignored, {} display-only",
                result.ignored.len(),
                result.display_only.len()
            )
            .dimmed()
        );
    }
}
