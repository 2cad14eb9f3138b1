use serde_json::json;
use tabled::settings::Style;
use tabled::{Table, Tabled};

use super::{CommandOutput, print_json};
use crate::bridge::Bridge;
use crate::cli::OutputOptions;
use crate::error::Result;
use crate::ignore::IgnoreAction;
use crate::types::IgnoreType;

#[derive(Tabled)]
struct IgnoredRow {
    #[tabled(rename = "Ticket")]
    ticket: String,
    #[tabled(rename = "Type")]
    ignore_type: String,
    #[tabled(rename = "Since")]
    since: String,
}

pub async fn cmd_ignore_add(
    bridge: &Bridge,
    id: &str,
    ignore_type: IgnoreType,
    output: OutputOptions,
) -> Result<()> {
    let changed = bridge.ignore(id, IgnoreAction::Add, ignore_type).await?;
    let text = if changed {
        format!("Ignoring {id} ({ignore_type})")
    } else {
        format!("{id} is already ignored ({ignore_type})")
    };
    CommandOutput::new(json!({ "ticket_id": id, "type": ignore_type, "changed": changed }))
        .with_text(text)
        .print(output)
}

pub async fn cmd_ignore_remove(bridge: &Bridge, id: &str, output: OutputOptions) -> Result<()> {
    // Type is irrelevant for removal
    let changed = bridge
        .ignore(id, IgnoreAction::Remove, IgnoreType::Temporary)
        .await?;
    let text = if changed {
        format!("No longer ignoring {id}")
    } else {
        format!("{id} was not ignored")
    };
    CommandOutput::new(json!({ "ticket_id": id, "changed": changed }))
        .with_text(text)
        .print(output)
}

pub fn cmd_ignore_ls(bridge: &Bridge, output: OutputOptions) -> Result<()> {
    let ignored = bridge.list_ignored()?;
    if output.json {
        return print_json(&ignored);
    }
    if ignored.is_empty() {
        println!("No ignored tickets.");
        return Ok(());
    }
    let rows: Vec<IgnoredRow> = ignored
        .iter()
        .map(|i| IgnoredRow {
            ticket: i.ticket_id.clone(),
            ignore_type: i.ignore_type.to_string(),
            since: i.created_at.strftime("%Y-%m-%d %H:%M").to_string(),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
    Ok(())
}

pub async fn cmd_ignore_clear_temp(bridge: &Bridge, output: OutputOptions) -> Result<()> {
    let removed = bridge.clear_temporary_ignores().await?;
    let ids: Vec<&str> = removed.iter().map(|i| i.ticket_id.as_str()).collect();
    CommandOutput::new(json!({ "removed": ids }))
        .with_text(format!("Cleared {} temporary ignore(s)", removed.len()))
        .print(output)
}
