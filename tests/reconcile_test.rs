mod common;

use common::{BACKENDS, Harness};
use trackbridge::reconcile::Bucket;
use trackbridge::remote::memory::Failure;
use trackbridge::{BridgeError, IgnoreAction, IgnoreType, IssueItem, Platform, TaskItem};

#[tokio::test]
async fn test_scenario_buckets() {
    for backend in BACKENDS {
        let h = Harness::scenario(backend).await;
        let result = h.bridge.analyze(None).await.unwrap();

        assert_eq!(result.bucket_of("T-1"), Some(Bucket::Missing));
        assert_eq!(result.bucket_of("T-2"), Some(Bucket::Mismatched));
        assert_eq!(result.bucket_of("SEC-7"), Some(Bucket::Mismatched));

        let pair = result.mismatched_pair("T-2").unwrap();
        assert_eq!(pair.issue.id, "SEC-7");
        assert!(pair.tag_mismatch);
        assert!(!pair.status_mismatch);
        assert_eq!(pair.field_diffs.len(), 1);
        assert_eq!(pair.field_diffs[0].field, "subsystem");
        assert_eq!(pair.field_diffs[0].expected.as_deref(), Some("security"));
        assert_eq!(pair.field_diffs[0].actual.as_deref(), Some("backend"));
    }
}

#[tokio::test]
async fn test_every_ticket_lands_in_one_bucket() {
    let tasks = vec![
        TaskItem::new("T-1", "Fix login bug").with_column("Backlog"),
        TaskItem::new("T-2", "Rotate keys").with_column("In Progress"),
        TaskItem::new("T-3", "Write threat model").with_column("Done"),
    ];
    let issues = vec![
        IssueItem::new("SEC-1", "Rotate keys").with_state("In Progress"),
        IssueItem::new("SEC-2", "Write threat model").with_state("Open"),
        IssueItem::new("SEC-3", "Leaked token in logs").with_state("Findings"),
        IssueItem::new("SEC-4", "Unrelated issue").with_state("Open"),
    ];
    let h = Harness::new(BACKENDS[1], tasks.clone(), issues.clone());
    let result = h.bridge.analyze(None).await.unwrap();

    for id in tasks.iter().map(|t| &t.id).chain(issues.iter().map(|i| &i.id)) {
        assert!(result.bucket_of(id).is_some(), "{id} is in no bucket");
    }
    assert_eq!(result.bucket_of("SEC-1"), Some(Bucket::Matched));
    assert_eq!(result.bucket_of("T-3"), Some(Bucket::Mismatched));
    assert_eq!(result.bucket_of("SEC-3"), Some(Bucket::Findings));
    assert_eq!(result.bucket_of("SEC-4"), Some(Bucket::Orphaned));

    let counts = result.counts();
    assert_eq!(
        counts.matched * 2
            + counts.mismatched * 2
            + counts.missing
            + counts.orphaned
            + counts.findings,
        tasks.len() + issues.len()
    );
}

#[tokio::test]
async fn test_analyze_twice_is_identical() {
    let h = Harness::scenario(BACKENDS[0]).await;
    let first = h.bridge.analyze(None).await.unwrap();
    let second = h.bridge.analyze(None).await.unwrap();
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
}

#[tokio::test]
async fn test_forever_ignore_suppresses_until_removed() {
    for backend in BACKENDS {
        let h = Harness::scenario(backend).await;
        assert!(
            h.bridge
                .ignore("T-2", IgnoreAction::Add, IgnoreType::Permanent)
                .await
                .unwrap()
        );

        let result = h.bridge.analyze(None).await.unwrap();
        assert_eq!(result.bucket_of("T-2"), Some(Bucket::Ignored));
        // The mapped counterpart is suppressed with it
        assert_eq!(result.bucket_of("SEC-7"), Some(Bucket::Ignored));
        assert!(result.mismatched.is_empty());
        assert!(result.orphaned.is_empty());

        // Clearing temporary entries keeps permanent ones
        assert!(h.bridge.clear_temporary_ignores().await.unwrap().is_empty());
        let result = h.bridge.analyze(None).await.unwrap();
        assert_eq!(result.bucket_of("T-2"), Some(Bucket::Ignored));

        h.bridge
            .ignore("T-2", IgnoreAction::Remove, IgnoreType::Permanent)
            .await
            .unwrap();
        let result = h.bridge.analyze(None).await.unwrap();
        assert_eq!(result.bucket_of("T-2"), Some(Bucket::Mismatched));
    }
}

#[tokio::test]
async fn test_temporary_ignore_clears() {
    let h = Harness::scenario(BACKENDS[1]).await;
    h.bridge
        .ignore("T-1", IgnoreAction::Add, IgnoreType::Temporary)
        .await
        .unwrap();
    assert_eq!(
        h.bridge.analyze(None).await.unwrap().bucket_of("T-1"),
        Some(Bucket::Ignored)
    );

    let cleared = h.bridge.clear_temporary_ignores().await.unwrap();
    assert_eq!(cleared.len(), 1);
    assert_eq!(cleared[0].ticket_id, "T-1");
    assert_eq!(
        h.bridge.analyze(None).await.unwrap().bucket_of("T-1"),
        Some(Bucket::Missing)
    );
    assert!(h.bridge.list_ignored().unwrap().is_empty());
}

#[tokio::test]
async fn test_mapping_to_deleted_issue_is_stale() {
    let h = Harness::scenario(BACKENDS[0]).await;
    h.tracker.remove("SEC-7");

    let result = h.bridge.analyze(None).await.unwrap();
    assert_eq!(result.bucket_of("T-2"), Some(Bucket::Missing));
    assert_eq!(result.stale_mappings.len(), 1);
    assert_eq!(result.stale_mappings[0].issue_id, "SEC-7");
}

#[tokio::test]
async fn test_column_filter() {
    let h = Harness::scenario(BACKENDS[1]).await;
    let result = h
        .bridge
        .analyze(Some("Backlog".to_string()))
        .await
        .unwrap();
    assert_eq!(result.bucket_of("T-1"), Some(Bucket::Missing));
    assert_eq!(result.bucket_of("T-2"), None);
}

#[tokio::test]
async fn test_fetch_failures_surface() {
    let h = Harness::scenario(BACKENDS[1]).await;
    h.tracker.fail_fetch(true);
    let err = h.bridge.analyze(None).await.unwrap_err();
    assert!(err.is_transient());

    h.tracker.fail_fetch(false);
    h.board.fail_auth(Failure::Unauthorized);
    let err = h.bridge.analyze(None).await.unwrap_err();
    assert!(matches!(
        err,
        BridgeError::Unauthorized {
            platform: Platform::Board,
            ..
        }
    ));
}
