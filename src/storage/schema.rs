//! SQLite schema.

use rusqlite::Connection;

use crate::error::Result;

pub const CURRENT_SCHEMA_VERSION: i32 = 1;

pub const SCHEMA_SQL: &str = r"
    -- Task <-> issue links. One counterpart per id, per user.
    CREATE TABLE IF NOT EXISTS mappings (
        user_id TEXT NOT NULL,
        project TEXT NOT NULL,
        task_id TEXT NOT NULL,
        issue_id TEXT NOT NULL,
        origin TEXT NOT NULL,
        created_at TEXT NOT NULL,
        UNIQUE (user_id, task_id),
        UNIQUE (user_id, issue_id)
    );
    CREATE INDEX IF NOT EXISTS idx_mappings_scope ON mappings(user_id, project);

    CREATE TABLE IF NOT EXISTS ignored_tickets (
        user_id TEXT NOT NULL,
        project TEXT NOT NULL,
        ticket_id TEXT NOT NULL,
        ignore_type TEXT NOT NULL,
        created_at TEXT NOT NULL,
        PRIMARY KEY (user_id, project, ticket_id)
    );

    CREATE TABLE IF NOT EXISTS sync_operations (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        project TEXT NOT NULL,
        kind TEXT NOT NULL,
        ticket_ids TEXT NOT NULL,
        status TEXT NOT NULL,
        created_at TEXT NOT NULL,
        started_at TEXT,
        finished_at TEXT,
        result TEXT NOT NULL DEFAULT 'null'
    );
    CREATE INDEX IF NOT EXISTS idx_operations_scope ON sync_operations(user_id, project, created_at);

    -- No foreign key: snapshots are reaped independently of operations.
    CREATE TABLE IF NOT EXISTS rollback_snapshots (
        operation_id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        project TEXT NOT NULL,
        entries TEXT NOT NULL,
        created_at TEXT NOT NULL,
        expires_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_snapshots_expires ON rollback_snapshots(expires_at);

    -- Append-only. operation_id is kept even if the operation is gone.
    CREATE TABLE IF NOT EXISTS audit_logs (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        operation_id TEXT,
        user_id TEXT NOT NULL,
        project TEXT NOT NULL,
        ticket_id TEXT NOT NULL,
        platform TEXT NOT NULL,
        action TEXT NOT NULL,
        actor TEXT NOT NULL,
        field_name TEXT,
        old_value TEXT,
        new_value TEXT,
        created_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_audit_scope ON audit_logs(user_id, project, created_at);
    CREATE INDEX IF NOT EXISTS idx_audit_ticket ON audit_logs(ticket_id);
    CREATE INDEX IF NOT EXISTS idx_audit_operation ON audit_logs(operation_id);
";

/// Apply the schema. Idempotent: every statement uses `IF NOT EXISTS`.
pub fn apply_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.pragma_update(None, "user_version", CURRENT_SCHEMA_VERSION)?;
    // WAL is unavailable for in-memory databases; ignore the result there.
    let _ = conn.pragma_update(None, "journal_mode", "WAL");
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(())
}
