mod common;

use common::{BACKENDS, Harness};
use jiff::{SignedDuration, Timestamp};
use trackbridge::{
    AuditAction, AuditFilter, Bridge, DeleteScope, IgnoreAction, IgnoreType, OperationKind,
    Platform,
};

fn csv_filters() -> Vec<(&'static str, &'static str)> {
    vec![
        (r"\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}\.\d{3}Z", "[ts]"),
        (
            r"[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}",
            "[uuid]",
        ),
    ]
}

async fn synced(backend: trackbridge::config::StorageBackend) -> Harness {
    let h = Harness::scenario(backend).await;
    h.bridge
        .execute(OperationKind::Sync, vec!["T-2".to_string()], DeleteScope::Both)
        .await
        .unwrap();
    h
}

#[tokio::test]
async fn test_csv_export() {
    for backend in BACKENDS {
        let h = synced(backend).await;
        let csv = h.bridge.audit_logs_csv(&AuditFilter::default()).unwrap();

        insta::allow_duplicates! {
            insta::with_settings!({ filters => csv_filters() }, {
                insta::assert_snapshot!(csv, @r"
                timestamp,operation_id,ticket_id,platform,action,field_name,old_value,new_value,actor
                [ts],,T-2,board,mapping_added,mapping,,T-2 <-> SEC-7,alice
                [ts],[uuid],T-2,tracker,updated,subsystem,backend,security,alice
                ");
            });
        }
    }
}

#[tokio::test]
async fn test_csv_export_respects_filter() {
    let h = synced(BACKENDS[1]).await;
    let csv = h
        .bridge
        .audit_logs_csv(&AuditFilter {
            action: Some(AuditAction::MappingAdded),
            ..Default::default()
        })
        .unwrap();
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[1].ends_with(",T-2 <-> SEC-7,alice"));
}

#[tokio::test]
async fn test_filters() {
    for backend in BACKENDS {
        let h = synced(backend).await;
        h.bridge
            .ignore("T-1", IgnoreAction::Add, IgnoreType::Temporary)
            .await
            .unwrap();

        let all = h.bridge.audit_logs(&AuditFilter::default()).unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));

        let by_ticket = h.bridge.audit_logs(&AuditFilter::for_ticket("T-1")).unwrap();
        assert_eq!(by_ticket.len(), 1);
        assert_eq!(by_ticket[0].action, AuditAction::Ignored);

        let tracker = h
            .bridge
            .audit_logs(&AuditFilter {
                platform: Some(Platform::Tracker),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(tracker.len(), 1);
        assert_eq!(tracker[0].action, AuditAction::Updated);

        let nobody = h
            .bridge
            .audit_logs(&AuditFilter {
                actor: Some("bob".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert!(nobody.is_empty());

        let latest = h
            .bridge
            .audit_logs(&AuditFilter {
                limit: Some(1),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].ticket_id, "T-1");

        let now = Timestamp::now();
        let future = h
            .bridge
            .audit_logs(&AuditFilter {
                since: Some(now + SignedDuration::from_hours(1)),
                ..Default::default()
            })
            .unwrap();
        assert!(future.is_empty());
        let past = h
            .bridge
            .audit_logs(&AuditFilter {
                until: Some(now + SignedDuration::from_hours(1)),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(past.len(), 3);
    }
}

#[tokio::test]
async fn test_entries_are_scoped_to_user() {
    for backend in BACKENDS {
        let h = synced(backend).await;

        let mut config = common::config();
        config.user = Some("bob".to_string());
        let bob = Bridge::new(&config, h.board.clone(), h.tracker.clone(), h.storage.clone());
        assert!(bob.audit_logs(&AuditFilter::default()).unwrap().is_empty());
        assert!(bob.mappings().unwrap().is_empty());
        assert!(bob.sync_history(10).unwrap().is_empty());
    }
}
