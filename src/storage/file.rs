//! JSON-file storage.
//!
//! Mappings, ignore entries, operations and snapshots live in memory and are
//! rewritten as whole JSON documents on every change, through a temp file in
//! the same directory followed by a rename. The audit log is an append-only
//! NDJSON file.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use jiff::Timestamp;
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;

use crate::audit::{AuditFilter, AuditLogEntry};
use crate::error::{BridgeError, Result};
use crate::rollback::RollbackSnapshot;
use crate::sync::SyncOperation;
use crate::types::{IgnoreType, IgnoredTicket, Platform, Scope, TicketMapping};

use super::{MappingWrite, Storage, check_mapping, in_scope};

const MAPPINGS_FILE: &str = "mappings.json";
const IGNORED_FILE: &str = "ignored.json";
const OPERATIONS_FILE: &str = "operations.json";
const SNAPSHOTS_FILE: &str = "snapshots.json";
const AUDIT_FILE: &str = "audit.ndjson";

#[derive(Debug, Default)]
struct State {
    mappings: Vec<TicketMapping>,
    ignored: Vec<IgnoredTicket>,
    operations: Vec<SyncOperation>,
    snapshots: Vec<RollbackSnapshot>,
}

#[derive(Debug)]
pub struct FileStorage {
    dir: PathBuf,
    state: Mutex<State>,
    audit: Mutex<()>,
}

impl FileStorage {
    /// Open (or create) a storage directory.
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir).map_err(|e| BridgeError::storage("create", dir, e))?;

        let state = State {
            mappings: read_document(&dir.join(MAPPINGS_FILE))?,
            ignored: read_document(&dir.join(IGNORED_FILE))?,
            operations: read_document(&dir.join(OPERATIONS_FILE))?,
            snapshots: read_document(&dir.join(SNAPSHOTS_FILE))?,
        };

        Ok(Self {
            dir: dir.to_path_buf(),
            state: Mutex::new(state),
            audit: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn persist<T: Serialize>(&self, file: &str, items: &[T]) -> Result<()> {
        write_document(&self.dir.join(file), items)
    }
}

fn read_document<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = fs::read_to_string(path).map_err(|e| BridgeError::storage("read", path, e))?;
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(&content)?)
}

/// Write a document atomically: either the new content is fully written or
/// the previous file is left untouched.
fn write_document<T: Serialize>(path: &Path, items: &[T]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let content = serde_json::to_string_pretty(items)?;

    let mut temp = NamedTempFile::new_in(dir).map_err(|e| BridgeError::storage("create", dir, e))?;
    temp.write_all(content.as_bytes())
        .map_err(|e| BridgeError::storage("write", temp.path().to_path_buf(), e))?;
    temp.as_file()
        .sync_all()
        .map_err(|e| BridgeError::storage("sync", path, e))?;
    temp.persist(path)
        .map_err(|e| BridgeError::storage("rename", path, e.error))?;
    Ok(())
}

impl Storage for FileStorage {
    fn list_mappings(&self, scope: &Scope) -> Result<Vec<TicketMapping>> {
        let state = self.state.lock();
        Ok(state
            .mappings
            .iter()
            .filter(|m| in_scope(&m.user, &m.project, scope))
            .cloned()
            .collect())
    }

    fn upsert_mapping(&self, mapping: &TicketMapping) -> Result<MappingWrite> {
        let mut state = self.state.lock();
        let write = check_mapping(&state.mappings, mapping)?;
        if write == MappingWrite::Created {
            state.mappings.push(mapping.clone());
            self.persist(MAPPINGS_FILE, &state.mappings)?;
        }
        Ok(write)
    }

    fn remove_mapping(
        &self,
        scope: &Scope,
        platform: Platform,
        id: &str,
    ) -> Result<Option<TicketMapping>> {
        let mut state = self.state.lock();
        let position = state.mappings.iter().position(|m| {
            in_scope(&m.user, &m.project, scope)
                && match platform {
                    Platform::Board => m.task_id == id,
                    Platform::Tracker => m.issue_id == id,
                }
        });
        let Some(position) = position else {
            return Ok(None);
        };
        let removed = state.mappings.remove(position);
        self.persist(MAPPINGS_FILE, &state.mappings)?;
        Ok(Some(removed))
    }

    fn list_ignored(&self, scope: &Scope) -> Result<Vec<IgnoredTicket>> {
        let state = self.state.lock();
        Ok(state
            .ignored
            .iter()
            .filter(|i| in_scope(&i.user, &i.project, scope))
            .cloned()
            .collect())
    }

    fn add_ignored(&self, entry: &IgnoredTicket) -> Result<bool> {
        let mut state = self.state.lock();
        let existing = state.ignored.iter_mut().find(|i| {
            i.user == entry.user && i.project == entry.project && i.ticket_id == entry.ticket_id
        });
        match existing {
            Some(current) if current.ignore_type == entry.ignore_type => return Ok(false),
            Some(current) => current.ignore_type = entry.ignore_type,
            None => state.ignored.push(entry.clone()),
        }
        self.persist(IGNORED_FILE, &state.ignored)?;
        Ok(true)
    }

    fn remove_ignored(&self, scope: &Scope, ticket_id: &str) -> Result<Option<IgnoredTicket>> {
        let mut state = self.state.lock();
        let position = state
            .ignored
            .iter()
            .position(|i| in_scope(&i.user, &i.project, scope) && i.ticket_id == ticket_id);
        let Some(position) = position else {
            return Ok(None);
        };
        let removed = state.ignored.remove(position);
        self.persist(IGNORED_FILE, &state.ignored)?;
        Ok(Some(removed))
    }

    fn clear_temporary_ignored(&self, scope: &Scope) -> Result<Vec<IgnoredTicket>> {
        let mut state = self.state.lock();
        let (removed, kept): (Vec<_>, Vec<_>) = state.ignored.drain(..).partition(|i| {
            in_scope(&i.user, &i.project, scope) && i.ignore_type == IgnoreType::Temporary
        });
        state.ignored = kept;
        if !removed.is_empty() {
            self.persist(IGNORED_FILE, &state.ignored)?;
        }
        Ok(removed)
    }

    fn insert_operation(
        &self,
        operation: &SyncOperation,
        snapshot: Option<&RollbackSnapshot>,
    ) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(snapshot) = snapshot {
            state
                .snapshots
                .retain(|s| s.operation_id != snapshot.operation_id);
            state.snapshots.push(snapshot.clone());
            self.persist(SNAPSHOTS_FILE, &state.snapshots)?;
        }
        state.operations.push(operation.clone());
        self.persist(OPERATIONS_FILE, &state.operations)
    }

    fn update_operation(&self, operation: &SyncOperation) -> Result<()> {
        let mut state = self.state.lock();
        let Some(current) = state.operations.iter_mut().find(|o| o.id == operation.id) else {
            return Err(BridgeError::OperationNotFound(operation.id.clone()));
        };
        *current = operation.clone();
        self.persist(OPERATIONS_FILE, &state.operations)
    }

    fn get_operation(&self, id: &str) -> Result<Option<SyncOperation>> {
        let state = self.state.lock();
        Ok(state.operations.iter().find(|o| o.id == id).cloned())
    }

    fn list_operations(&self, scope: &Scope, limit: usize) -> Result<Vec<SyncOperation>> {
        let state = self.state.lock();
        let mut operations: Vec<SyncOperation> = state
            .operations
            .iter()
            .filter(|o| in_scope(&o.user, &o.project, scope))
            .cloned()
            .collect();
        operations.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        operations.truncate(limit);
        Ok(operations)
    }

    fn get_snapshot(&self, operation_id: &str) -> Result<Option<RollbackSnapshot>> {
        let state = self.state.lock();
        Ok(state
            .snapshots
            .iter()
            .find(|s| s.operation_id == operation_id)
            .cloned())
    }

    fn save_snapshot(&self, snapshot: &RollbackSnapshot) -> Result<()> {
        let mut state = self.state.lock();
        match state
            .snapshots
            .iter_mut()
            .find(|s| s.operation_id == snapshot.operation_id)
        {
            Some(current) => *current = snapshot.clone(),
            None => state.snapshots.push(snapshot.clone()),
        }
        self.persist(SNAPSHOTS_FILE, &state.snapshots)
    }

    fn delete_snapshot(&self, operation_id: &str) -> Result<bool> {
        let mut state = self.state.lock();
        let before = state.snapshots.len();
        state.snapshots.retain(|s| s.operation_id != operation_id);
        if state.snapshots.len() == before {
            return Ok(false);
        }
        self.persist(SNAPSHOTS_FILE, &state.snapshots)?;
        Ok(true)
    }

    fn purge_expired_snapshots(&self, now: Timestamp) -> Result<usize> {
        let mut state = self.state.lock();
        let before = state.snapshots.len();
        state.snapshots.retain(|s| !s.is_expired(now));
        let purged = before - state.snapshots.len();
        if purged > 0 {
            self.persist(SNAPSHOTS_FILE, &state.snapshots)?;
        }
        Ok(purged)
    }

    fn append_audit(&self, entries: &[AuditLogEntry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let path = self.dir.join(AUDIT_FILE);
        let _guard = self.audit.lock();

        let mut buffer = String::new();
        for entry in entries {
            buffer.push_str(&serde_json::to_string(entry)?);
            buffer.push('\n');
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| BridgeError::storage("open", &path, e))?;
        file.write_all(buffer.as_bytes())
            .map_err(|e| BridgeError::storage("append to", &path, e))?;
        file.flush()
            .map_err(|e| BridgeError::storage("flush", &path, e))?;
        Ok(())
    }

    fn query_audit(&self, scope: &Scope, filter: &AuditFilter) -> Result<Vec<AuditLogEntry>> {
        let path = self.dir.join(AUDIT_FILE);
        let _guard = self.audit.lock();
        if !path.exists() {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&path).map_err(|e| BridgeError::storage("read", &path, e))?;
        let mut entries = Vec::new();
        for (line_num, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AuditLogEntry>(line) {
                Ok(entry) if in_scope(&entry.user, &entry.project, scope) => entries.push(entry),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(line = line_num + 1, error = %e, "skipping malformed audit line");
                }
            }
        }
        Ok(filter.apply(entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MappingOrigin;
    use tempfile::TempDir;

    #[test]
    fn test_state_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let scope = Scope::new("alice", "p");
        {
            let storage = FileStorage::open(dir.path()).unwrap();
            storage
                .upsert_mapping(&TicketMapping::new(&scope, "T-1", "SEC-1", MappingOrigin::Created))
                .unwrap();
        }
        let storage = FileStorage::open(dir.path()).unwrap();
        let mappings = storage.list_mappings(&scope).unwrap();
        assert_eq!(mappings.len(), 1);
        assert_eq!(mappings[0].issue_id, "SEC-1");
        assert!(!dir.path().join("mappings.json.tmp").exists());
    }

    #[test]
    fn test_malformed_audit_line_is_skipped() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::open(dir.path()).unwrap();
        let scope = Scope::new("alice", "p");
        let entry = AuditLogEntry::new(
            &scope,
            "T-1",
            Platform::Tracker,
            crate::audit::AuditAction::Created,
            "alice",
        );
        storage.append_audit(std::slice::from_ref(&entry)).unwrap();

        let mut file = OpenOptions::new()
            .append(true)
            .open(dir.path().join(AUDIT_FILE))
            .unwrap();
        writeln!(file, "{{not json").unwrap();

        let entries = storage.query_audit(&scope, &AuditFilter::default()).unwrap();
        assert_eq!(entries, vec![entry]);
    }
}
