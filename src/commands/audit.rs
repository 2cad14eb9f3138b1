use std::io::{self, Write};

use tabled::settings::Style;
use tabled::{Table, Tabled};

use super::{or_dash, print_json};
use crate::audit::AuditFilter;
use crate::bridge::Bridge;
use crate::cli::OutputOptions;
use crate::error::Result;

#[derive(Tabled)]
struct AuditRow {
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "Ticket")]
    ticket: String,
    #[tabled(rename = "Platform")]
    platform: String,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Field")]
    field: String,
    #[tabled(rename = "Old")]
    old: String,
    #[tabled(rename = "New")]
    new: String,
    #[tabled(rename = "Actor")]
    actor: String,
}

/// Query or export the audit log
pub fn cmd_audit(
    bridge: &Bridge,
    filter: AuditFilter,
    csv: bool,
    output: OutputOptions,
) -> Result<()> {
    if csv {
        let mut stdout = io::stdout().lock();
        stdout.write_all(bridge.audit_logs_csv(&filter)?.as_bytes())?;
        return Ok(());
    }

    let entries = bridge.audit_logs(&filter)?;
    if output.json {
        return print_json(&entries);
    }
    if entries.is_empty() {
        println!("No audit entries match.");
        return Ok(());
    }

    let rows: Vec<AuditRow> = entries
        .iter()
        .map(|e| AuditRow {
            time: e.timestamp.strftime("%Y-%m-%d %H:%M:%S").to_string(),
            ticket: e.ticket_id.clone(),
            platform: e.platform.to_string(),
            action: e.action.to_string(),
            field: or_dash(e.field_name.as_deref()),
            old: or_dash(e.old_value.as_deref()),
            new: or_dash(e.new_value.as_deref()),
            actor: e.actor.clone(),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
    println!("\n{} entr{}", entries.len(), if entries.len() == 1 { "y" } else { "ies" });
    Ok(())
}
