mod common;

use common::{BACKENDS, Harness, scenario_issues, scenario_tasks};
use trackbridge::remote::memory::Failure;
use trackbridge::{
    AuditAction, AuditFilter, BridgeError, DeleteScope, OperationKind, OperationStatus,
    OutcomeStatus, Platform,
};

fn ids(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_rollback_restores_synced_fields() {
    for backend in BACKENDS {
        let h = Harness::scenario(backend).await;
        let sync = h
            .bridge
            .execute(OperationKind::Sync, ids(&["T-2"]), DeleteScope::Both)
            .await
            .unwrap();
        assert!(h.storage.get_snapshot(&sync.operation.id).unwrap().is_some());

        let report = h.bridge.rollback(&sync.operation.id).await.unwrap();
        assert_eq!(report.operation.id, sync.operation.id);
        assert_eq!(report.operation.status, OperationStatus::RolledBack);
        assert_eq!(report.outcome("T-2").unwrap().status, OutcomeStatus::Success);

        assert_eq!(
            h.tracker.get("SEC-7").unwrap().subsystem.as_deref(),
            Some("backend")
        );
        assert!(h.storage.get_snapshot(&sync.operation.id).unwrap().is_none());
        assert_eq!(
            h.bridge.operation(&sync.operation.id).unwrap().unwrap().status,
            OperationStatus::RolledBack
        );

        let undone = h
            .bridge
            .audit_logs(&AuditFilter {
                action: Some(AuditAction::RolledBack),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(undone.len(), 1);
        assert_eq!(undone[0].field_name.as_deref(), Some("subsystem"));
        assert_eq!(undone[0].old_value.as_deref(), Some("security"));
        assert_eq!(undone[0].new_value.as_deref(), Some("backend"));
        assert_ne!(undone[0].operation_id.as_deref(), Some(sync.operation.id.as_str()));

        // The rollback is an operation in its own right
        let history = h.bridge.sync_history(10).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].kind, OperationKind::Rollback);
        assert_eq!(history[0].status, OperationStatus::Completed);
    }
}

#[tokio::test]
async fn test_rollback_removes_created_issue() {
    for backend in BACKENDS {
        let h = Harness::scenario(backend).await;
        let create = h
            .bridge
            .execute(OperationKind::Create, ids(&["T-1"]), DeleteScope::Both)
            .await
            .unwrap();
        assert!(h.tracker.get("SEC-1").is_some());

        h.bridge.rollback(&create.operation.id).await.unwrap();
        assert!(h.tracker.get("SEC-1").is_none());
        assert!(h.bridge.mappings().unwrap().iter().all(|m| m.task_id != "T-1"));

        let result = h.bridge.analyze(None).await.unwrap();
        assert!(result.missing_task("T-1").is_some());
    }
}

#[tokio::test]
async fn test_rollback_of_create_restores_replaced_mapping() {
    for backend in BACKENDS {
        let h = Harness::scenario(backend).await;
        h.tracker.remove("SEC-7");
        let create = h
            .bridge
            .execute(OperationKind::Create, ids(&["T-2"]), DeleteScope::Both)
            .await
            .unwrap();
        assert_eq!(
            create.outcome("T-2").unwrap().counterpart_id.as_deref(),
            Some("SEC-1")
        );

        h.bridge.rollback(&create.operation.id).await.unwrap();
        assert!(h.tracker.get("SEC-1").is_none());

        let mappings: Vec<_> = h
            .bridge
            .mappings()
            .unwrap()
            .into_iter()
            .filter(|m| m.task_id == "T-2")
            .collect();
        assert_eq!(mappings.len(), 1);
        assert_eq!(mappings[0].issue_id, "SEC-7");
    }
}

#[tokio::test]
async fn test_rollback_recreates_deleted_pair_and_relinks() {
    for backend in BACKENDS {
        let h = Harness::scenario(backend).await;
        let delete = h
            .bridge
            .execute(OperationKind::Delete, ids(&["T-2"]), DeleteScope::Both)
            .await
            .unwrap();
        assert!(h.board.get("T-2").is_none());
        assert!(h.tracker.get("SEC-7").is_none());

        let report = h.bridge.rollback(&delete.operation.id).await.unwrap();
        let outcome = report.outcome("T-2").unwrap();
        assert_eq!(outcome.status, OutcomeStatus::Success);

        let task = h.board.get("T-1001").unwrap();
        assert_eq!(task.title, "Harden session cookies");
        assert_eq!(task.column.as_deref(), Some("In Progress"));
        assert_eq!(task.tags, vec!["Security".to_string()]);
        let issue = h.tracker.get("SEC-1").unwrap();
        assert_eq!(issue.title, "Harden session cookies");
        assert_eq!(issue.subsystem.as_deref(), Some("backend"));

        let mappings = h.bridge.mappings().unwrap();
        assert_eq!(mappings.len(), 1);
        assert_eq!(mappings[0].task_id, "T-1001");
        assert_eq!(mappings[0].issue_id, "SEC-1");
    }
}

#[tokio::test]
async fn test_expired_snapshot_is_refused() {
    let mut config = common::config();
    config.sync.snapshot_retention_days = 0;
    let h = Harness::with_config(config, BACKENDS[1], scenario_tasks(), scenario_issues());
    h.bridge.link("T-2", "SEC-7").await.unwrap();

    let sync = h
        .bridge
        .execute(OperationKind::Sync, ids(&["T-2"]), DeleteScope::Both)
        .await
        .unwrap();
    let err = h.bridge.rollback(&sync.operation.id).await.unwrap_err();
    assert!(matches!(err, BridgeError::SnapshotExpired(ref id) if *id == sync.operation.id));

    // Nothing was undone
    assert_eq!(
        h.tracker.get("SEC-7").unwrap().subsystem.as_deref(),
        Some("security")
    );
    assert!(h.storage.get_snapshot(&sync.operation.id).unwrap().is_none());
}

#[tokio::test]
async fn test_operation_without_snapshot_is_refused() {
    let h = Harness::scenario(BACKENDS[0]).await;
    h.tracker.fail_auth(Failure::Unauthorized);
    let failed = h
        .bridge
        .execute(OperationKind::Sync, ids(&["T-2"]), DeleteScope::Both)
        .await
        .unwrap();
    assert_eq!(failed.operation.status, OperationStatus::Failed);

    let err = h.bridge.rollback(&failed.operation.id).await.unwrap_err();
    assert!(matches!(err, BridgeError::SnapshotMissing(_)));
}

#[tokio::test]
async fn test_incomplete_rollback_can_be_retried() {
    for backend in BACKENDS {
        let h = Harness::scenario(backend).await;
        let sync = h
            .bridge
            .execute(OperationKind::Sync, ids(&["T-2"]), DeleteScope::Both)
            .await
            .unwrap();

        h.tracker.fail_on("SEC-7", Failure::Transient);
        let err = h.bridge.rollback(&sync.operation.id).await.unwrap_err();
        assert!(matches!(err, BridgeError::RollbackIncomplete { failed: 1, .. }));

        // The original keeps its status and its (reduced) snapshot
        assert_eq!(
            h.bridge.operation(&sync.operation.id).unwrap().unwrap().status,
            OperationStatus::Completed
        );
        let snapshot = h.storage.get_snapshot(&sync.operation.id).unwrap().unwrap();
        assert_eq!(snapshot.entries.len(), 1);
        assert_eq!(snapshot.entries[0].platform, Platform::Tracker);

        let attempt = &h.bridge.sync_history(1).unwrap()[0];
        assert_eq!(attempt.kind, OperationKind::Rollback);
        assert_eq!(attempt.status, OperationStatus::Failed);

        h.tracker.clear_failures();
        let report = h.bridge.rollback(&sync.operation.id).await.unwrap();
        assert_eq!(report.operation.status, OperationStatus::RolledBack);
        assert_eq!(
            h.tracker.get("SEC-7").unwrap().subsystem.as_deref(),
            Some("backend")
        );
    }
}

#[tokio::test]
async fn test_unknown_operation() {
    let h = Harness::scenario(BACKENDS[1]).await;
    assert!(matches!(
        h.bridge.rollback("no-such-operation").await,
        Err(BridgeError::OperationNotFound(_))
    ));
}

#[tokio::test]
async fn test_rollbacks_and_rolled_back_operations_are_final() {
    let h = Harness::scenario(BACKENDS[1]).await;
    let sync = h
        .bridge
        .execute(OperationKind::Sync, ids(&["T-2"]), DeleteScope::Both)
        .await
        .unwrap();
    h.bridge.rollback(&sync.operation.id).await.unwrap();

    assert!(matches!(
        h.bridge.rollback(&sync.operation.id).await,
        Err(BridgeError::InvalidOperationState { .. })
    ));

    let rollback_op = h.bridge.sync_history(1).unwrap().remove(0);
    assert_eq!(rollback_op.kind, OperationKind::Rollback);
    assert!(matches!(
        h.bridge.rollback(&rollback_op.id).await,
        Err(BridgeError::InvalidOperationState { .. })
    ));
}
