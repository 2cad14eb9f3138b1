//! Persistence for mappings, ignore entries, operations, snapshots and the
//! audit log.
//!
//! The core only talks to the [`Storage`] trait; [`open`] picks the backend
//! from configuration at startup.

pub mod file;
pub mod schema;
pub mod sqlite;

use std::sync::Arc;

use jiff::Timestamp;

use crate::audit::{AuditFilter, AuditLogEntry};
use crate::config::{Config, StorageBackend};
use crate::error::{BridgeError, Result};
use crate::rollback::RollbackSnapshot;
use crate::sync::SyncOperation;
use crate::types::{IgnoredTicket, Platform, Scope, TicketMapping};

pub use file::FileStorage;
pub use sqlite::SqliteStorage;

/// Result of an atomic mapping upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingWrite {
    Created,
    /// The identical mapping already existed
    Unchanged,
}

/// Storage capability used by every core component.
///
/// Implementations serialize writes internally; callers hold the per-user
/// lock when they read-then-write.
pub trait Storage: Send + Sync {
    fn list_mappings(&self, scope: &Scope) -> Result<Vec<TicketMapping>>;

    /// Insert a mapping, or report that it already exists. Fails with
    /// [`BridgeError::MappingConflict`] when either id is linked elsewhere
    /// for the same user.
    fn upsert_mapping(&self, mapping: &TicketMapping) -> Result<MappingWrite>;

    /// Remove the mapping containing `id` on `platform`.
    fn remove_mapping(
        &self,
        scope: &Scope,
        platform: Platform,
        id: &str,
    ) -> Result<Option<TicketMapping>>;

    fn list_ignored(&self, scope: &Scope) -> Result<Vec<IgnoredTicket>>;

    /// Add or retype an ignore entry. Returns false if an identical entry
    /// was already present.
    fn add_ignored(&self, entry: &IgnoredTicket) -> Result<bool>;

    fn remove_ignored(&self, scope: &Scope, ticket_id: &str) -> Result<Option<IgnoredTicket>>;

    /// Remove every temporary entry in scope, returning what was removed.
    fn clear_temporary_ignored(&self, scope: &Scope) -> Result<Vec<IgnoredTicket>>;

    /// Persist a new operation together with its snapshot, atomically.
    fn insert_operation(
        &self,
        operation: &SyncOperation,
        snapshot: Option<&RollbackSnapshot>,
    ) -> Result<()>;

    fn update_operation(&self, operation: &SyncOperation) -> Result<()>;

    fn get_operation(&self, id: &str) -> Result<Option<SyncOperation>>;

    /// Most recent operations first.
    fn list_operations(&self, scope: &Scope, limit: usize) -> Result<Vec<SyncOperation>>;

    fn get_snapshot(&self, operation_id: &str) -> Result<Option<RollbackSnapshot>>;

    fn save_snapshot(&self, snapshot: &RollbackSnapshot) -> Result<()>;

    fn delete_snapshot(&self, operation_id: &str) -> Result<bool>;

    /// Delete snapshots whose expiry is at or before `now`.
    fn purge_expired_snapshots(&self, now: Timestamp) -> Result<usize>;

    fn append_audit(&self, entries: &[AuditLogEntry]) -> Result<()>;

    /// Matching entries in chronological order.
    fn query_audit(&self, scope: &Scope, filter: &AuditFilter) -> Result<Vec<AuditLogEntry>>;
}

/// Open the configured backend.
pub fn open(config: &Config) -> Result<Arc<dyn Storage>> {
    let path = config.storage_path();
    tracing::debug!(backend = %config.storage.backend, path = %path.display(), "opening storage");
    match config.storage.backend {
        StorageBackend::File => Ok(Arc::new(FileStorage::open(&path)?)),
        StorageBackend::Sqlite => Ok(Arc::new(SqliteStorage::open(&path)?)),
    }
}

/// Decide whether `mapping` can be written next to `existing` (all of the
/// same user's mappings).
pub(crate) fn check_mapping<'a>(
    existing: impl IntoIterator<Item = &'a TicketMapping>,
    mapping: &TicketMapping,
) -> Result<MappingWrite> {
    for current in existing {
        if current.user != mapping.user {
            continue;
        }
        let same_task = current.task_id == mapping.task_id;
        let same_issue = current.issue_id == mapping.issue_id;
        match (same_task, same_issue) {
            (true, true) => return Ok(MappingWrite::Unchanged),
            (true, false) => {
                return Err(BridgeError::MappingConflict {
                    task_id: mapping.task_id.clone(),
                    issue_id: mapping.issue_id.clone(),
                    reason: format!("task is already linked to {}", current.issue_id),
                });
            }
            (false, true) => {
                return Err(BridgeError::MappingConflict {
                    task_id: mapping.task_id.clone(),
                    issue_id: mapping.issue_id.clone(),
                    reason: format!("issue is already linked to {}", current.task_id),
                });
            }
            (false, false) => {}
        }
    }
    Ok(MappingWrite::Created)
}

fn in_scope(user: &str, project: &str, scope: &Scope) -> bool {
    user == scope.user && project == scope.project
}
