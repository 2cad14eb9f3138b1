//! CSV export of the audit log.
//!
//! Fields containing commas, quotes or newlines are quoted, with inner
//! quotes doubled.

use std::io::{self, Write};

use super::AuditLogEntry;

/// Column order of the export.
pub const CSV_COLUMNS: &[&str] = &[
    "timestamp",
    "operation_id",
    "ticket_id",
    "platform",
    "action",
    "field_name",
    "old_value",
    "new_value",
    "actor",
];

pub fn escape_field(value: &str) -> String {
    let needs_quoting = value.contains(',')
        || value.contains('"')
        || value.contains('\n')
        || value.contains('\r');

    if needs_quoting {
        let escaped = value.replace('"', "\"\"");
        format!("\"{escaped}\"")
    } else {
        value.to_string()
    }
}

/// Timestamp rendering used in exports: UTC with milliseconds.
pub fn format_timestamp(ts: jiff::Timestamp) -> String {
    ts.strftime("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

fn column_value(entry: &AuditLogEntry, column: &str) -> String {
    match column {
        "timestamp" => format_timestamp(entry.timestamp),
        "operation_id" => entry.operation_id.clone().unwrap_or_default(),
        "ticket_id" => entry.ticket_id.clone(),
        "platform" => entry.platform.to_string(),
        "action" => entry.action.to_string(),
        "field_name" => entry.field_name.clone().unwrap_or_default(),
        "old_value" => entry.old_value.clone().unwrap_or_default(),
        "new_value" => entry.new_value.clone().unwrap_or_default(),
        "actor" => entry.actor.clone(),
        _ => String::new(),
    }
}

pub fn format_row(entry: &AuditLogEntry) -> String {
    CSV_COLUMNS
        .iter()
        .map(|column| escape_field(&column_value(entry, column)))
        .collect::<Vec<_>>()
        .join(",")
}

/// Stream entries as CSV, header first.
pub fn write_csv<W: Write>(writer: &mut W, entries: &[AuditLogEntry]) -> io::Result<()> {
    writeln!(writer, "{}", CSV_COLUMNS.join(","))?;
    for entry in entries {
        writeln!(writer, "{}", format_row(entry))?;
    }
    Ok(())
}

pub fn format_csv(entries: &[AuditLogEntry]) -> String {
    let mut output = CSV_COLUMNS.join(",");
    output.push('\n');
    for entry in entries {
        output.push_str(&format_row(entry));
        output.push('\n');
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditAction;
    use crate::types::{Platform, Scope};

    #[test]
    fn test_escape_field() {
        assert_eq!(escape_field("plain"), "plain");
        assert_eq!(escape_field("a,b"), "\"a,b\"");
        assert_eq!(escape_field("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(escape_field("two\nlines"), "\"two\nlines\"");
    }

    #[test]
    fn test_format_csv() {
        let mut entry = AuditLogEntry::new(
            &Scope::new("alice", "p"),
            "T-2",
            Platform::Tracker,
            AuditAction::Updated,
            "alice",
        )
        .with_operation("op-1")
        .with_change(
            "subsystem",
            Some("backend".to_string()),
            Some("security, auth".to_string()),
        );
        entry.timestamp = "2025-05-04T03:02:01.5Z".parse().unwrap();

        insta::assert_snapshot!(format_csv(&[entry]), @r#"
        timestamp,operation_id,ticket_id,platform,action,field_name,old_value,new_value,actor
        2025-05-04T03:02:01.500Z,op-1,T-2,tracker,updated,subsystem,backend,"security, auth",alice
        "#);
    }

    #[test]
    fn test_write_csv_matches_format_csv() {
        let entry = AuditLogEntry::new(
            &Scope::new("alice", "p"),
            "T-1",
            Platform::Board,
            AuditAction::Deleted,
            "scheduler",
        );
        let mut buffer = Vec::new();
        write_csv(&mut buffer, std::slice::from_ref(&entry)).unwrap();
        assert_eq!(String::from_utf8(buffer).unwrap(), format_csv(&[entry]));
    }
}
