mod common;

use std::time::Duration;

use common::{BACKENDS, Harness};
use trackbridge::{OperationKind, OperationStatus, SchedulerAction, SchedulerKind};

#[tokio::test(start_paused = true)]
async fn test_auto_create_tick_creates_missing_issues() {
    let h = Harness::scenario(BACKENDS[1]).await;
    let status = h
        .bridge
        .scheduler_control(SchedulerKind::AutoCreate, SchedulerAction::Start, Some(60))
        .unwrap();
    assert!(status.running);
    assert_eq!(status.interval, Some(60));

    tokio::time::sleep(Duration::from_secs(61)).await;
    assert!(h.tracker.get("SEC-1").is_some());
    let status = h
        .bridge
        .scheduler_control(SchedulerKind::AutoCreate, SchedulerAction::Status, None)
        .unwrap();
    assert_eq!(status.run_count, 1);
    assert!(status.last_run_summary.unwrap().starts_with("create "));
    assert!(status.last_error.is_none());

    let history = h.bridge.sync_history(10).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].kind, OperationKind::Create);
    assert_eq!(history[0].status, OperationStatus::Completed);

    // Nothing left to create on the next tick
    tokio::time::sleep(Duration::from_secs(60)).await;
    let status = h
        .bridge
        .scheduler_control(SchedulerKind::AutoCreate, SchedulerAction::Status, None)
        .unwrap();
    assert_eq!(status.run_count, 2);
    assert_eq!(status.last_run_summary.as_deref(), Some("nothing to do"));
    assert_eq!(h.bridge.sync_history(10).unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_auto_sync_tick_pushes_mismatches() {
    let h = Harness::scenario(BACKENDS[0]).await;
    h.bridge
        .scheduler_control(SchedulerKind::AutoSync, SchedulerAction::Start, Some(30))
        .unwrap();

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(
        h.tracker.get("SEC-7").unwrap().subsystem.as_deref(),
        Some("security")
    );
    // Auto-sync never creates
    assert_eq!(h.tracker.len(), 1);

    let status = h
        .bridge
        .scheduler_control(SchedulerKind::AutoSync, SchedulerAction::Stop, None)
        .unwrap();
    assert!(!status.running);
    assert_eq!(status.run_count, 1);
}

#[tokio::test(start_paused = true)]
async fn test_start_is_idempotent() {
    let h = Harness::scenario(BACKENDS[1]).await;
    for _ in 0..3 {
        h.bridge
            .scheduler_control(SchedulerKind::AutoSync, SchedulerAction::Start, Some(60))
            .unwrap();
    }
    tokio::time::sleep(Duration::from_secs(61)).await;

    let status = h
        .bridge
        .scheduler_control(SchedulerKind::AutoSync, SchedulerAction::Status, None)
        .unwrap();
    assert_eq!(status.run_count, 1);
    assert_eq!(h.bridge.sync_history(10).unwrap().len(), 1);

    // The other scheduler was never started
    let other = h
        .bridge
        .scheduler_control(SchedulerKind::AutoCreate, SchedulerAction::Status, None)
        .unwrap();
    assert!(!other.running);
    assert_eq!(other.run_count, 0);
}

#[tokio::test(start_paused = true)]
async fn test_failing_tick_keeps_scheduler_running() {
    let h = Harness::scenario(BACKENDS[1]).await;
    h.tracker.fail_fetch(true);
    h.bridge
        .scheduler_control(SchedulerKind::AutoSync, SchedulerAction::Start, Some(10))
        .unwrap();

    tokio::time::sleep(Duration::from_secs(25)).await;
    let status = h
        .bridge
        .scheduler_control(SchedulerKind::AutoSync, SchedulerAction::Status, None)
        .unwrap();
    assert!(status.running);
    assert_eq!(status.run_count, 2);
    assert!(status.last_error.is_some());

    h.tracker.fail_fetch(false);
    tokio::time::sleep(Duration::from_secs(10)).await;
    let status = h
        .bridge
        .scheduler_control(SchedulerKind::AutoSync, SchedulerAction::Status, None)
        .unwrap();
    assert_eq!(status.run_count, 3);
    assert!(status.last_error.is_none());
}

#[tokio::test]
async fn test_run_once() {
    let h = Harness::scenario(BACKENDS[0]).await;
    assert!(h.bridge.run_scheduler_once(SchedulerKind::AutoCreate).await);
    assert!(h.tracker.get("SEC-1").is_some());

    let status = h
        .bridge
        .scheduler_control(SchedulerKind::AutoCreate, SchedulerAction::Status, None)
        .unwrap();
    assert!(!status.running);
    assert_eq!(status.run_count, 1);
}

#[tokio::test(start_paused = true)]
async fn test_zero_interval_is_rejected() {
    let h = Harness::scenario(BACKENDS[0]).await;
    assert!(
        h.bridge
            .scheduler_control(SchedulerKind::AutoSync, SchedulerAction::Start, Some(0))
            .is_err()
    );
}
