//! SQLite storage.

use std::path::Path;
use std::str::FromStr;

use jiff::Timestamp;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};

use crate::audit::{AuditFilter, AuditLogEntry};
use crate::error::{BridgeError, Result};
use crate::rollback::RollbackSnapshot;
use crate::sync::SyncOperation;
use crate::types::{IgnoredTicket, Platform, Scope, TicketMapping};

use super::schema::apply_schema;
use super::{MappingWrite, Storage, check_mapping};

/// SQLite-based storage backend.
#[derive(Debug)]
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .map_err(|e| BridgeError::storage("create", parent, e))?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        apply_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        apply_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn parse_ts(value: &str) -> Result<Timestamp> {
    value
        .parse()
        .map_err(|_| BridgeError::InvalidTimestamp(value.to_string()))
}

fn parse_opt_ts(value: Option<String>) -> Result<Option<Timestamp>> {
    value.as_deref().map(parse_ts).transpose()
}

fn parse_enum<T: FromStr<Err = BridgeError>>(value: &str) -> Result<T> {
    value.parse()
}

struct MappingRow {
    user: String,
    project: String,
    task_id: String,
    issue_id: String,
    origin: String,
    created_at: String,
}

impl MappingRow {
    const COLUMNS: &'static str = "user_id, project, task_id, issue_id, origin, created_at";

    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            user: row.get(0)?,
            project: row.get(1)?,
            task_id: row.get(2)?,
            issue_id: row.get(3)?,
            origin: row.get(4)?,
            created_at: row.get(5)?,
        })
    }

    fn into_mapping(self) -> Result<TicketMapping> {
        Ok(TicketMapping {
            user: self.user,
            project: self.project,
            task_id: self.task_id,
            issue_id: self.issue_id,
            origin: parse_enum(&self.origin)?,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

struct IgnoredRow {
    user: String,
    project: String,
    ticket_id: String,
    ignore_type: String,
    created_at: String,
}

impl IgnoredRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            user: row.get(0)?,
            project: row.get(1)?,
            ticket_id: row.get(2)?,
            ignore_type: row.get(3)?,
            created_at: row.get(4)?,
        })
    }

    fn into_ignored(self) -> Result<IgnoredTicket> {
        Ok(IgnoredTicket {
            user: self.user,
            project: self.project,
            ticket_id: self.ticket_id,
            ignore_type: parse_enum(&self.ignore_type)?,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

struct OperationRow {
    id: String,
    user: String,
    project: String,
    kind: String,
    ticket_ids: String,
    status: String,
    created_at: String,
    started_at: Option<String>,
    finished_at: Option<String>,
    result: String,
}

impl OperationRow {
    const COLUMNS: &'static str =
        "id, user_id, project, kind, ticket_ids, status, created_at, started_at, finished_at, result";

    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user: row.get(1)?,
            project: row.get(2)?,
            kind: row.get(3)?,
            ticket_ids: row.get(4)?,
            status: row.get(5)?,
            created_at: row.get(6)?,
            started_at: row.get(7)?,
            finished_at: row.get(8)?,
            result: row.get(9)?,
        })
    }

    fn into_operation(self) -> Result<SyncOperation> {
        Ok(SyncOperation {
            id: self.id,
            user: self.user,
            project: self.project,
            kind: parse_enum(&self.kind)?,
            ticket_ids: serde_json::from_str(&self.ticket_ids)?,
            status: parse_enum(&self.status)?,
            created_at: parse_ts(&self.created_at)?,
            started_at: parse_opt_ts(self.started_at)?,
            finished_at: parse_opt_ts(self.finished_at)?,
            result: serde_json::from_str(&self.result)?,
        })
    }
}

struct SnapshotRow {
    operation_id: String,
    user: String,
    project: String,
    entries: String,
    created_at: String,
    expires_at: String,
}

impl SnapshotRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            operation_id: row.get(0)?,
            user: row.get(1)?,
            project: row.get(2)?,
            entries: row.get(3)?,
            created_at: row.get(4)?,
            expires_at: row.get(5)?,
        })
    }

    fn into_snapshot(self) -> Result<RollbackSnapshot> {
        Ok(RollbackSnapshot {
            operation_id: self.operation_id,
            user: self.user,
            project: self.project,
            entries: serde_json::from_str(&self.entries)?,
            created_at: parse_ts(&self.created_at)?,
            expires_at: parse_ts(&self.expires_at)?,
        })
    }
}

struct AuditRow {
    id: String,
    operation_id: Option<String>,
    user: String,
    project: String,
    ticket_id: String,
    platform: String,
    action: String,
    actor: String,
    field_name: Option<String>,
    old_value: Option<String>,
    new_value: Option<String>,
    created_at: String,
}

impl AuditRow {
    const COLUMNS: &'static str = "id, operation_id, user_id, project, ticket_id, platform, action, \
                                   actor, field_name, old_value, new_value, created_at";

    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            operation_id: row.get(1)?,
            user: row.get(2)?,
            project: row.get(3)?,
            ticket_id: row.get(4)?,
            platform: row.get(5)?,
            action: row.get(6)?,
            actor: row.get(7)?,
            field_name: row.get(8)?,
            old_value: row.get(9)?,
            new_value: row.get(10)?,
            created_at: row.get(11)?,
        })
    }

    fn into_entry(self) -> Result<AuditLogEntry> {
        Ok(AuditLogEntry {
            id: self.id,
            operation_id: self.operation_id,
            user: self.user,
            project: self.project,
            ticket_id: self.ticket_id,
            platform: parse_enum::<Platform>(&self.platform)?,
            action: parse_enum(&self.action)?,
            actor: self.actor,
            field_name: self.field_name,
            old_value: self.old_value,
            new_value: self.new_value,
            timestamp: parse_ts(&self.created_at)?,
        })
    }
}

fn write_snapshot(conn: &Connection, snapshot: &RollbackSnapshot) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO rollback_snapshots \
         (operation_id, user_id, project, entries, created_at, expires_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            snapshot.operation_id,
            snapshot.user,
            snapshot.project,
            serde_json::to_string(&snapshot.entries)?,
            snapshot.created_at.to_string(),
            snapshot.expires_at.to_string(),
        ],
    )?;
    Ok(())
}

impl Storage for SqliteStorage {
    fn list_mappings(&self, scope: &Scope) -> Result<Vec<TicketMapping>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {} FROM mappings WHERE user_id = ?1 AND project = ?2 ORDER BY task_id",
            MappingRow::COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![scope.user, scope.project], MappingRow::read)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(MappingRow::into_mapping).collect()
    }

    fn upsert_mapping(&self, mapping: &TicketMapping) -> Result<MappingWrite> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let existing = {
            let sql = format!(
                "SELECT {} FROM mappings WHERE user_id = ?1 AND (task_id = ?2 OR issue_id = ?3)",
                MappingRow::COLUMNS
            );
            let mut stmt = tx.prepare(&sql)?;
            let rows = stmt
                .query_map(
                    params![mapping.user, mapping.task_id, mapping.issue_id],
                    MappingRow::read,
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.into_iter()
                .map(MappingRow::into_mapping)
                .collect::<Result<Vec<_>>>()?
        };

        let write = check_mapping(&existing, mapping)?;
        if write == MappingWrite::Created {
            tx.execute(
                "INSERT INTO mappings (user_id, project, task_id, issue_id, origin, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    mapping.user,
                    mapping.project,
                    mapping.task_id,
                    mapping.issue_id,
                    mapping.origin.as_str(),
                    mapping.created_at.to_string(),
                ],
            )?;
        }
        tx.commit()?;
        Ok(write)
    }

    fn remove_mapping(
        &self,
        scope: &Scope,
        platform: Platform,
        id: &str,
    ) -> Result<Option<TicketMapping>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let column = match platform {
            Platform::Board => "task_id",
            Platform::Tracker => "issue_id",
        };

        let sql = format!(
            "SELECT {} FROM mappings WHERE user_id = ?1 AND project = ?2 AND {column} = ?3",
            MappingRow::COLUMNS
        );
        let row = tx
            .query_row(&sql, params![scope.user, scope.project, id], MappingRow::read)
            .optional()?;
        let Some(row) = row else {
            return Ok(None);
        };

        let sql =
            format!("DELETE FROM mappings WHERE user_id = ?1 AND project = ?2 AND {column} = ?3");
        tx.execute(&sql, params![scope.user, scope.project, id])?;
        tx.commit()?;
        row.into_mapping().map(Some)
    }

    fn list_ignored(&self, scope: &Scope) -> Result<Vec<IgnoredTicket>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT user_id, project, ticket_id, ignore_type, created_at FROM ignored_tickets \
             WHERE user_id = ?1 AND project = ?2 ORDER BY ticket_id",
        )?;
        let rows = stmt
            .query_map(params![scope.user, scope.project], IgnoredRow::read)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(IgnoredRow::into_ignored).collect()
    }

    fn add_ignored(&self, entry: &IgnoredTicket) -> Result<bool> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "INSERT INTO ignored_tickets (user_id, project, ticket_id, ignore_type, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT (user_id, project, ticket_id) DO UPDATE SET ignore_type = excluded.ignore_type \
             WHERE ignore_type != excluded.ignore_type",
            params![
                entry.user,
                entry.project,
                entry.ticket_id,
                entry.ignore_type.as_str(),
                entry.created_at.to_string(),
            ],
        )?;
        Ok(changed > 0)
    }

    fn remove_ignored(&self, scope: &Scope, ticket_id: &str) -> Result<Option<IgnoredTicket>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let row = tx
            .query_row(
                "SELECT user_id, project, ticket_id, ignore_type, created_at FROM ignored_tickets \
                 WHERE user_id = ?1 AND project = ?2 AND ticket_id = ?3",
                params![scope.user, scope.project, ticket_id],
                IgnoredRow::read,
            )
            .optional()?;
        let Some(row) = row else {
            return Ok(None);
        };
        tx.execute(
            "DELETE FROM ignored_tickets WHERE user_id = ?1 AND project = ?2 AND ticket_id = ?3",
            params![scope.user, scope.project, ticket_id],
        )?;
        tx.commit()?;
        row.into_ignored().map(Some)
    }

    fn clear_temporary_ignored(&self, scope: &Scope) -> Result<Vec<IgnoredTicket>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let rows = {
            let mut stmt = tx.prepare(
                "SELECT user_id, project, ticket_id, ignore_type, created_at FROM ignored_tickets \
                 WHERE user_id = ?1 AND project = ?2 AND ignore_type = 'temporary' ORDER BY ticket_id",
            )?;
            stmt.query_map(params![scope.user, scope.project], IgnoredRow::read)?
                .collect::<rusqlite::Result<Vec<_>>>()?
        };
        tx.execute(
            "DELETE FROM ignored_tickets \
             WHERE user_id = ?1 AND project = ?2 AND ignore_type = 'temporary'",
            params![scope.user, scope.project],
        )?;
        tx.commit()?;
        rows.into_iter().map(IgnoredRow::into_ignored).collect()
    }

    fn insert_operation(
        &self,
        operation: &SyncOperation,
        snapshot: Option<&RollbackSnapshot>,
    ) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            "INSERT INTO sync_operations \
             (id, user_id, project, kind, ticket_ids, status, created_at, started_at, finished_at, result) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                operation.id,
                operation.user,
                operation.project,
                operation.kind.as_str(),
                serde_json::to_string(&operation.ticket_ids)?,
                operation.status.as_str(),
                operation.created_at.to_string(),
                operation.started_at.map(|t| t.to_string()),
                operation.finished_at.map(|t| t.to_string()),
                serde_json::to_string(&operation.result)?,
            ],
        )?;
        if let Some(snapshot) = snapshot {
            write_snapshot(&tx, snapshot)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn update_operation(&self, operation: &SyncOperation) -> Result<()> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE sync_operations SET status = ?2, started_at = ?3, finished_at = ?4, result = ?5 \
             WHERE id = ?1",
            params![
                operation.id,
                operation.status.as_str(),
                operation.started_at.map(|t| t.to_string()),
                operation.finished_at.map(|t| t.to_string()),
                serde_json::to_string(&operation.result)?,
            ],
        )?;
        if changed == 0 {
            return Err(BridgeError::OperationNotFound(operation.id.clone()));
        }
        Ok(())
    }

    fn get_operation(&self, id: &str) -> Result<Option<SyncOperation>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {} FROM sync_operations WHERE id = ?1",
            OperationRow::COLUMNS
        );
        conn.query_row(&sql, params![id], OperationRow::read)
            .optional()?
            .map(OperationRow::into_operation)
            .transpose()
    }

    fn list_operations(&self, scope: &Scope, limit: usize) -> Result<Vec<SyncOperation>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {} FROM sync_operations WHERE user_id = ?1 AND project = ?2",
            OperationRow::COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![scope.user, scope.project], OperationRow::read)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        let mut operations = rows
            .into_iter()
            .map(OperationRow::into_operation)
            .collect::<Result<Vec<_>>>()?;
        // Text timestamps do not sort lexically; order in Rust.
        operations.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        operations.truncate(limit);
        Ok(operations)
    }

    fn get_snapshot(&self, operation_id: &str) -> Result<Option<RollbackSnapshot>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT operation_id, user_id, project, entries, created_at, expires_at \
             FROM rollback_snapshots WHERE operation_id = ?1",
            params![operation_id],
            SnapshotRow::read,
        )
        .optional()?
        .map(SnapshotRow::into_snapshot)
        .transpose()
    }

    fn save_snapshot(&self, snapshot: &RollbackSnapshot) -> Result<()> {
        let conn = self.conn.lock();
        write_snapshot(&conn, snapshot)
    }

    fn delete_snapshot(&self, operation_id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "DELETE FROM rollback_snapshots WHERE operation_id = ?1",
            params![operation_id],
        )?;
        Ok(changed > 0)
    }

    fn purge_expired_snapshots(&self, now: Timestamp) -> Result<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let candidates = {
            let mut stmt = tx.prepare("SELECT operation_id, expires_at FROM rollback_snapshots")?;
            stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?
        };

        let mut purged = 0;
        for (operation_id, expires_at) in candidates {
            if parse_ts(&expires_at)? <= now {
                purged += tx.execute(
                    "DELETE FROM rollback_snapshots WHERE operation_id = ?1",
                    params![operation_id],
                )?;
            }
        }
        tx.commit()?;
        Ok(purged)
    }

    fn append_audit(&self, entries: &[AuditLogEntry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO audit_logs \
                 (id, operation_id, user_id, project, ticket_id, platform, action, actor, \
                  field_name, old_value, new_value, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            )?;
            for entry in entries {
                stmt.execute(params![
                    entry.id,
                    entry.operation_id,
                    entry.user,
                    entry.project,
                    entry.ticket_id,
                    entry.platform.as_str(),
                    entry.action.as_str(),
                    entry.actor,
                    entry.field_name,
                    entry.old_value,
                    entry.new_value,
                    entry.timestamp.to_string(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn query_audit(&self, scope: &Scope, filter: &AuditFilter) -> Result<Vec<AuditLogEntry>> {
        let conn = self.conn.lock();
        let mut sql = format!(
            "SELECT {} FROM audit_logs WHERE user_id = ?1 AND project = ?2",
            AuditRow::COLUMNS
        );
        let mut values: Vec<String> = vec![scope.user.clone(), scope.project.clone()];
        if let Some(ticket_id) = &filter.ticket_id {
            values.push(ticket_id.clone());
            sql.push_str(&format!(" AND ticket_id = ?{}", values.len()));
        }
        if let Some(operation_id) = &filter.operation_id {
            values.push(operation_id.clone());
            sql.push_str(&format!(" AND operation_id = ?{}", values.len()));
        }
        if let Some(action) = filter.action {
            values.push(action.as_str().to_string());
            sql.push_str(&format!(" AND action = ?{}", values.len()));
        }
        sql.push_str(" ORDER BY seq");

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(values.iter()), AuditRow::read)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        let entries = rows
            .into_iter()
            .map(AuditRow::into_entry)
            .collect::<Result<Vec<_>>>()?;
        Ok(filter.apply(entries))
    }
}
