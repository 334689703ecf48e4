//! Cache-first read tests

use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::time::Duration;

use eventsync::client::data_source::{CacheFirstSource, FetchOptions};
use eventsync::client::local_db::Store;
use eventsync::client::remote::RemoteError;
use eventsync::client::sync::ConnectionQuality;
use eventsync::shared::event::event_channel;
use eventsync::shared::{Collection, EventRecord, SyncEventType};

use crate::common::*;

fn page(ids: impl IntoIterator<Item = usize>) -> Vec<Value> {
    ids.into_iter()
        .map(|i| event_json(&format!("e{i}"), &format!("Event {i}")))
        .collect()
}

fn titles(records: &[EventRecord]) -> Vec<&str> {
    records.iter().map(|r| r.title.as_str()).collect()
}

#[tokio::test]
async fn test_offline_serves_stale_cache_without_network() {
    let harness = Harness::new(false);
    harness
        .seed_cache(vec![event_json("e1", "One"), event_json("e2", "Two")])
        .await;
    let source = harness.events_source();

    let state = source.fetch(FetchOptions::default()).await;

    assert_eq!(state.records.len(), 2);
    assert!(state.from_cache);
    assert!(!state.is_loading);
    assert_eq!(state.error, None);
    assert!(harness.remote.calls().is_empty());
}

#[tokio::test]
async fn test_online_failure_keeps_cached_records() {
    let harness = Harness::new(true);
    harness.seed_cache(vec![event_json("e1", "One")]).await;
    harness
        .remote
        .push_fetch(Duration::ZERO, Err(RemoteError::network("connection refused")));
    let source = harness.events_source();

    let state = source.fetch(FetchOptions::default()).await;

    assert_eq!(titles(&state.records), vec!["One"]);
    assert_eq!(state.error, None);
    assert!(!state.is_loading);
    assert_eq!(harness.remote.fetch_queries().len(), 1);
}

#[tokio::test]
async fn test_online_failure_with_empty_cache_surfaces_error() {
    let harness = Harness::new(true);
    harness
        .remote
        .push_fetch(Duration::ZERO, Err(RemoteError::network("connection refused")));
    let source = harness.events_source();

    let state = source.fetch(FetchOptions::default()).await;

    assert!(state.records.is_empty());
    assert!(state.error.is_some());
    assert!(!state.is_loading);
}

#[tokio::test]
async fn test_remote_page_replaces_cache_emission() {
    let harness = Harness::new(true);
    harness.seed_cache(vec![event_json("old", "Old")]).await;
    harness.remote.push_page(page(1..=3), Some(3));
    let source = harness.events_source();
    let mut updates = source.subscribe();

    let state = source.fetch(FetchOptions::default()).await;

    assert_eq!(titles(&state.records), vec!["Event 1", "Event 2", "Event 3"]);
    assert!(!state.from_cache);
    assert!(!state.has_more);
    assert_eq!(state.total_count, Some(3));
    assert!(updates.has_changed().unwrap());
    assert_eq!(*updates.borrow_and_update(), state);
}

#[tokio::test]
async fn test_superseded_fetch_result_is_dropped() {
    let harness = Harness::new(true);
    harness.remote.push_fetch(
        Duration::from_millis(150),
        Ok(eventsync::client::remote::FetchPage {
            records: vec![event_json("a1", "Slow")],
            total_count: Some(1),
        }),
    );
    harness.remote.push_page(vec![event_json("b1", "Fast")], Some(1));

    let events = event_channel();
    let mut event_rx = events.subscribe();
    let source: CacheFirstSource<EventRecord> = CacheFirstSource::new(
        harness.store.clone(),
        harness.remote.clone(),
        harness.monitor.clone(),
        fast_config(),
        events,
    );

    let (first, second) = tokio::join!(source.fetch(FetchOptions::default().category("music")), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        source.fetch(FetchOptions::default()).await
    });

    assert_eq!(titles(&second.records), vec!["Fast"]);
    assert_eq!(titles(&first.records), vec!["Fast"]);
    assert_eq!(titles(&source.snapshot().records), vec!["Fast"]);

    let refreshed = tokio::time::timeout(Duration::from_secs(1), event_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        refreshed.event_type,
        SyncEventType::CacheRefreshed {
            collection: Collection::Events,
            records: 1
        }
    );
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(harness.cached_ids(Collection::Events).await, vec!["b1"]);
}

#[tokio::test]
async fn test_refresh_persists_and_broadcasts() {
    let harness = Harness::new(true);
    let events = event_channel();
    let mut event_rx = events.subscribe();
    let source: CacheFirstSource<EventRecord> = CacheFirstSource::new(
        harness.store.clone(),
        harness.remote.clone(),
        harness.monitor.clone(),
        fast_config(),
        events,
    );
    harness.remote.push_page(page(1..=2), Some(2));

    let state = source.refresh().await;
    assert_eq!(state.records.len(), 2);

    let event = tokio::time::timeout(Duration::from_secs(1), event_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(
        event.event_type,
        SyncEventType::CacheRefreshed { records: 2, .. }
    ));
    assert_eq!(harness.cached_ids(Collection::Events).await.len(), 2);
    assert!(harness.store.get_sync_status().await.unwrap().last_sync.is_some());
}

#[tokio::test]
async fn test_field_projection_is_passed_through() {
    let harness = Harness::new(true);
    let source = harness.events_source();

    source
        .fetch(FetchOptions::default().fields(["id", "title"]).limit(5))
        .await;

    let queries = harness.remote.fetch_queries();
    assert_eq!(queries.len(), 1);
    assert_eq!(queries[0].fields, Some(vec!["id".to_string(), "title".to_string()]));
    assert_eq!(queries[0].limit, Some(5));
    assert_eq!(queries[0].offset, 0);
}

#[tokio::test]
async fn test_load_more_appends_next_page() {
    let harness = Harness::new(true);
    harness.remote.push_page(page(1..=20), Some(25));
    harness.remote.push_page(page(21..=25), Some(25));
    let source = harness.events_source();

    let first = source.fetch(FetchOptions::default()).await;
    assert_eq!(first.records.len(), 20);
    assert!(first.has_more);

    let second = source.load_more().await;
    assert_eq!(second.records.len(), 25);
    assert!(!second.has_more);
    assert_eq!(harness.remote.fetch_queries()[1].offset, 20);

    // nothing left to load
    let third = source.load_more().await;
    assert_eq!(third, second);
    assert_eq!(harness.remote.fetch_queries().len(), 2);
}

#[tokio::test]
async fn test_load_more_failure_keeps_loaded_pages() {
    let harness = Harness::new(true);
    harness.remote.push_page(page(1..=20), Some(40));
    harness
        .remote
        .push_fetch(Duration::ZERO, Err(RemoteError::timeout("slow")));
    let source = harness.events_source();

    source.fetch(FetchOptions::default()).await;
    let state = source.load_more().await;

    assert_eq!(state.records.len(), 20);
    assert!(state.has_more);
    assert_eq!(state.error, None);
    assert!(!state.is_loading);
}

#[tokio::test]
async fn test_load_more_offline_is_a_no_op() {
    let harness = Harness::new(true);
    harness.remote.push_page(page(1..=20), Some(40));
    let source = harness.events_source();
    source.fetch(FetchOptions::default()).await;

    harness.monitor.set_online(false);
    let state = source.load_more().await;

    assert_eq!(state.records.len(), 20);
    assert_eq!(harness.remote.fetch_queries().len(), 1);
}

#[tokio::test]
async fn test_poor_connection_skips_network_unless_forced() {
    let harness = Harness::new(true);
    harness.monitor.set_quality(ConnectionQuality::Poor);
    harness.seed_cache(vec![event_json("e1", "Cached")]).await;
    let source = harness.events_source();

    let state = source.fetch(FetchOptions::default()).await;
    assert_eq!(titles(&state.records), vec!["Cached"]);
    assert!(harness.remote.calls().is_empty());

    harness.remote.push_page(vec![event_json("e2", "Fresh")], Some(1));
    let state = source.fetch(FetchOptions::default().forced()).await;
    assert_eq!(titles(&state.records), vec!["Fresh"]);
    assert_eq!(harness.remote.fetch_queries().len(), 1);
}

#[tokio::test]
async fn test_category_filter_applies_to_cache() {
    let harness = Harness::new(false);
    harness
        .seed_cache(vec![
            json!({"id": "e1", "title": "Jazz night", "category": "Music"}),
            json!({"id": "e2", "title": "Hackathon", "category": "tech"}),
            json!({"id": "e3", "title": "Open mic", "category": "music"}),
            json!({"id": "e4", "title": "Unsorted"}),
        ])
        .await;
    let source = harness.events_source();

    let state = source.fetch(FetchOptions::default().category("music")).await;

    let mut found = titles(&state.records);
    found.sort();
    assert_eq!(found, vec!["Jazz night", "Open mic"]);
}

#[tokio::test]
async fn test_cancel_discards_in_flight_result() {
    let harness = Harness::new(true);
    harness.remote.push_fetch(
        Duration::from_millis(100),
        Ok(eventsync::client::remote::FetchPage {
            records: page(1..=3),
            total_count: Some(3),
        }),
    );
    let source = harness.events_source();

    let (state, _) = tokio::join!(source.fetch(FetchOptions::default()), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        source.cancel();
    });

    assert!(state.records.is_empty());
    assert!(!state.is_loading);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(harness.cached_ids(Collection::Events).await.is_empty());
}
