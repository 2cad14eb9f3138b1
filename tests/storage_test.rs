mod common;

use jiff::{SignedDuration, Timestamp};
use tempfile::TempDir;

use common::{BACKENDS, open_storage};
use trackbridge::rollback::SnapshotEntry;
use trackbridge::storage::MappingWrite;
use trackbridge::types::MappingOrigin;
use trackbridge::{
    AuditAction, AuditFilter, AuditLogEntry, BridgeError, IgnoreType, IgnoredTicket, IssueItem,
    OperationKind, OperationStatus, Platform, RollbackSnapshot, Scope, SyncOperation,
    TicketMapping,
};

fn scope() -> Scope {
    Scope::new("alice", "1200:SEC")
}

fn ignored(ticket_id: &str, ignore_type: IgnoreType) -> IgnoredTicket {
    IgnoredTicket {
        user: "alice".to_string(),
        project: "1200:SEC".to_string(),
        ticket_id: ticket_id.to_string(),
        ignore_type,
        created_at: Timestamp::now(),
    }
}

fn snapshot_for(op: &SyncOperation, retention_days: u32) -> RollbackSnapshot {
    let issue = IssueItem::new("SEC-7", "Harden session cookies").with_subsystem("backend");
    RollbackSnapshot::capture(
        &op.id,
        &op.user,
        &op.project,
        vec![SnapshotEntry {
            ticket_id: "T-2".to_string(),
            platform: Platform::Tracker,
            remote_id: "SEC-7".to_string(),
            before: issue.field_values(),
            mapping: None,
        }],
        retention_days,
    )
}

#[test]
fn test_mapping_conflicts() {
    for backend in BACKENDS {
        let dir = TempDir::new().unwrap();
        let storage = open_storage(backend, &dir);
        let scope = scope();

        let mapping = TicketMapping::new(&scope, "T-2", "SEC-7", MappingOrigin::Manual);
        assert_eq!(storage.upsert_mapping(&mapping).unwrap(), MappingWrite::Created);
        assert_eq!(storage.upsert_mapping(&mapping).unwrap(), MappingWrite::Unchanged);

        for (task, issue) in [("T-2", "SEC-8"), ("T-3", "SEC-7")] {
            let err = storage
                .upsert_mapping(&TicketMapping::new(&scope, task, issue, MappingOrigin::Manual))
                .unwrap_err();
            assert!(matches!(err, BridgeError::MappingConflict { .. }), "{err}");
        }

        // Other users keep their own links
        let bob = Scope::new("bob", "1200:SEC");
        let theirs = TicketMapping::new(&bob, "T-2", "SEC-8", MappingOrigin::Manual);
        assert_eq!(storage.upsert_mapping(&theirs).unwrap(), MappingWrite::Created);
        assert_eq!(storage.list_mappings(&scope).unwrap().len(), 1);
        assert_eq!(storage.list_mappings(&bob).unwrap().len(), 1);

        let removed = storage
            .remove_mapping(&scope, Platform::Tracker, "SEC-7")
            .unwrap()
            .unwrap();
        assert_eq!(removed.task_id, "T-2");
        assert!(storage.list_mappings(&scope).unwrap().is_empty());
        assert!(
            storage
                .remove_mapping(&scope, Platform::Board, "T-2")
                .unwrap()
                .is_none()
        );
    }
}

#[test]
fn test_ignore_entries() {
    for backend in BACKENDS {
        let dir = TempDir::new().unwrap();
        let storage = open_storage(backend, &dir);
        let scope = scope();

        assert!(storage.add_ignored(&ignored("T-1", IgnoreType::Temporary)).unwrap());
        assert!(!storage.add_ignored(&ignored("T-1", IgnoreType::Temporary)).unwrap());
        // Retyping counts as a change
        assert!(storage.add_ignored(&ignored("T-1", IgnoreType::Permanent)).unwrap());
        assert!(storage.add_ignored(&ignored("SEC-4", IgnoreType::Temporary)).unwrap());

        let cleared = storage.clear_temporary_ignored(&scope).unwrap();
        assert_eq!(cleared.len(), 1);
        assert_eq!(cleared[0].ticket_id, "SEC-4");

        let left = storage.list_ignored(&scope).unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].ignore_type, IgnoreType::Permanent);

        assert!(storage.remove_ignored(&scope, "T-1").unwrap().is_some());
        assert!(storage.remove_ignored(&scope, "T-1").unwrap().is_none());
    }
}

#[test]
fn test_state_survives_reopen() {
    for backend in BACKENDS {
        let dir = TempDir::new().unwrap();
        let scope = scope();
        let mut op = SyncOperation::new(&scope, OperationKind::Sync, vec!["T-2".to_string()]);
        {
            let storage = open_storage(backend, &dir);
            storage
                .upsert_mapping(&TicketMapping::new(&scope, "T-2", "SEC-7", MappingOrigin::Manual))
                .unwrap();
            storage.add_ignored(&ignored("T-9", IgnoreType::Permanent)).unwrap();
            storage
                .insert_operation(&op, Some(&snapshot_for(&op, 30)))
                .unwrap();
            op.start();
            op.finish(OperationStatus::Completed, serde_json::json!({ "summary": "ok" }));
            storage.update_operation(&op).unwrap();
            storage
                .append_audit(&[
                    AuditLogEntry::new(&scope, "T-2", Platform::Tracker, AuditAction::Updated, "alice")
                        .with_operation(&op.id)
                        .with_change("subsystem", Some("backend".to_string()), Some("security".to_string())),
                ])
                .unwrap();
        }

        let storage = open_storage(backend, &dir);
        assert_eq!(storage.list_mappings(&scope).unwrap().len(), 1);
        assert_eq!(storage.list_ignored(&scope).unwrap()[0].ticket_id, "T-9");

        let stored = storage.get_operation(&op.id).unwrap().unwrap();
        assert_eq!(stored.status, OperationStatus::Completed);
        assert_eq!(stored.kind, OperationKind::Sync);
        assert_eq!(stored.ticket_ids, vec!["T-2".to_string()]);
        assert_eq!(stored.result["summary"], "ok");

        let snapshot = storage.get_snapshot(&op.id).unwrap().unwrap();
        assert_eq!(snapshot.entries.len(), 1);
        assert_eq!(snapshot.entries[0].remote_id, "SEC-7");

        let audit = storage
            .query_audit(&scope, &AuditFilter::for_operation(&op.id))
            .unwrap();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].new_value.as_deref(), Some("security"));
    }
}

#[test]
fn test_purge_expired_snapshots() {
    for backend in BACKENDS {
        let dir = TempDir::new().unwrap();
        let storage = open_storage(backend, &dir);
        let scope = scope();

        let short = SyncOperation::new(&scope, OperationKind::Sync, Vec::new());
        let long = SyncOperation::new(&scope, OperationKind::Create, Vec::new());
        storage.insert_operation(&short, Some(&snapshot_for(&short, 1))).unwrap();
        storage.insert_operation(&long, Some(&snapshot_for(&long, 30))).unwrap();

        assert_eq!(storage.purge_expired_snapshots(Timestamp::now()).unwrap(), 0);
        let in_two_days = Timestamp::now() + SignedDuration::from_hours(48);
        assert_eq!(storage.purge_expired_snapshots(in_two_days).unwrap(), 1);

        assert!(storage.get_snapshot(&short.id).unwrap().is_none());
        assert!(storage.get_snapshot(&long.id).unwrap().is_some());
        // The operation itself stays in history
        assert!(storage.get_operation(&short.id).unwrap().is_some());

        assert!(storage.delete_snapshot(&long.id).unwrap());
        assert!(!storage.delete_snapshot(&long.id).unwrap());
    }
}

#[test]
fn test_list_operations_newest_first() {
    for backend in BACKENDS {
        let dir = TempDir::new().unwrap();
        let storage = open_storage(backend, &dir);
        let scope = scope();

        let mut ids = Vec::new();
        for (i, kind) in [OperationKind::Create, OperationKind::Sync, OperationKind::Delete]
            .into_iter()
            .enumerate()
        {
            let mut op = SyncOperation::new(&scope, kind, Vec::new());
            op.created_at = "2026-03-01T00:00:00Z".parse::<Timestamp>().unwrap()
                + SignedDuration::from_mins(i as i64);
            storage.insert_operation(&op, None).unwrap();
            ids.push(op.id);
        }
        let other = SyncOperation::new(&Scope::new("bob", "1200:SEC"), OperationKind::Sync, Vec::new());
        storage.insert_operation(&other, None).unwrap();

        let listed: Vec<String> = storage
            .list_operations(&scope, 10)
            .unwrap()
            .into_iter()
            .map(|op| op.id)
            .collect();
        ids.reverse();
        assert_eq!(listed, ids);
        assert_eq!(storage.list_operations(&scope, 2).unwrap().len(), 2);
    }
}
