//! SQLite store tests: durability across restarts and replay on a real store

use pretty_assertions::assert_eq;
use std::sync::Arc;

use eventsync::client::local_db::{CachedRecord, LocalDatabase, Preferences, Store};
use eventsync::client::offline::{QueueStatus, QueuedUpdate, SyncCoordinator};
use eventsync::client::remote::RemoteError;
use eventsync::client::sync::NetworkMonitor;
use eventsync::shared::{Collection, OperationKind};

use crate::common::*;
use crate::assert_replayed;

#[tokio::test]
async fn test_queue_and_cache_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("local.db");

    let first_id = {
        let db = LocalDatabase::open(&path).await.unwrap();
        let first_id = db.enqueue(&create_event("e1")).await.unwrap();
        db.enqueue(&update_event("e1")).await.unwrap();
        let second = db.enqueue(&delete_event("e2")).await.unwrap();
        db.update_queued(
            &second,
            QueuedUpdate::status(QueueStatus::Failed)
                .with_retry_count(3)
                .with_error("503 maintenance"),
        )
        .await
        .unwrap();

        let now = chrono::Utc::now();
        db.put_records(
            Collection::Events,
            &[CachedRecord::new(Collection::Events, "e1", event_json("e1", "One"), now)],
        )
        .await
        .unwrap();
        db.set_preferences(Preferences { auto_sync: false }).await.unwrap();
        db.pool().close().await;
        first_id
    };

    let db = LocalDatabase::open(&path).await.unwrap();
    let queued = db.list_queued(None).await.unwrap();

    assert_eq!(queued.len(), 3);
    assert_eq!(queued[0].id, first_id);
    assert_eq!(queued[0].operation(), OperationKind::Create);
    assert_eq!(queued[1].operation(), OperationKind::Update);
    assert_eq!(queued[2].status, QueueStatus::Failed);
    assert_eq!(queued[2].retry_count, 3);
    assert_eq!(queued[2].error.as_deref(), Some("503 maintenance"));
    assert_eq!(queued[0].mutation, create_event("e1"));

    assert_eq!(
        db.get_records(Collection::Events).await.unwrap(),
        vec![event_json("e1", "One")]
    );
    assert!(!db.get_preferences().await.unwrap().auto_sync);

    let stats = db.get_stats().await.unwrap();
    assert_eq!(stats.cached_records, 1);
    assert_eq!(stats.pending_operations, 2);
    assert_eq!(stats.failed_operations, 1);
}

#[tokio::test]
async fn test_replay_against_sqlite_store() {
    let db = Arc::new(LocalDatabase::in_memory().await.unwrap());
    let remote = Arc::new(MockRemote::new());
    remote.fail_always("e2", RemoteError::network("connection reset"));
    let monitor = NetworkMonitor::new();
    let coordinator = SyncCoordinator::new(db.clone(), remote.clone(), monitor.clone(), fast_config());

    for id in ["e1", "e2", "e3"] {
        coordinator.queue_operation(create_event(id)).await.unwrap();
    }
    monitor.set_online(true);

    let report = assert_replayed!(coordinator.process_queue().await);
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.retried, 1);
    assert_eq!(remote.applied_ids(), vec!["e1", "e2", "e3"]);

    let remaining = db.list_queued(None).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].mutation.record_id(), "e2");
    assert_eq!(remaining[0].status, QueueStatus::Pending);
    assert_eq!(remaining[0].retry_count, 1);

    let status = db.get_sync_status().await.unwrap();
    assert!(status.last_sync.is_some());
    assert!(!status.in_progress);

    let mut cached: Vec<String> = db
        .get_records(Collection::Events)
        .await
        .unwrap()
        .into_iter()
        .map(|payload| payload["id"].as_str().unwrap().to_string())
        .collect();
    cached.sort();
    assert_eq!(cached, vec!["e1", "e3"]);
}

#[tokio::test]
async fn test_maintenance_purges_failed_and_expired() {
    let db = Arc::new(LocalDatabase::in_memory().await.unwrap());
    let coordinator = SyncCoordinator::new(
        db.clone(),
        Arc::new(MockRemote::new()),
        NetworkMonitor::new(),
        fast_config(),
    );

    let long_ago = chrono::Utc::now() - chrono::Duration::days(45);
    db.put_records(
        Collection::Events,
        &[CachedRecord::new(Collection::Events, "old", event_json("old", "Old"), long_ago)],
    )
    .await
    .unwrap();
    let id = db.enqueue(&create_event("e1")).await.unwrap();
    db.update_queued(&id, QueuedUpdate::status(QueueStatus::Failed))
        .await
        .unwrap();
    db.enqueue(&create_event("e2")).await.unwrap();

    let report = coordinator.run_maintenance().await.unwrap();

    assert_eq!(report.evicted, 1);
    assert_eq!(report.purged, 1);
    assert!(db.get_records(Collection::Events).await.unwrap().is_empty());
    assert_eq!(coordinator.queue_stats().await.unwrap().pending, 1);
}
