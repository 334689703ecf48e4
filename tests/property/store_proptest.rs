//! Property-based tests for the record cache

use proptest::prelude::*;
use serde_json::Value;
use std::collections::BTreeMap;

use eventsync::client::local_db::{CachedRecord, MemoryStore, Store};
use eventsync::shared::Collection;

use crate::common::event_json;

fn rows(entries: &[(String, String)]) -> Vec<CachedRecord> {
    let now = chrono::Utc::now();
    entries
        .iter()
        .map(|(id, title)| CachedRecord::new(Collection::Events, id.clone(), event_json(id, title), now))
        .collect()
}

fn by_id(payloads: Vec<Value>) -> BTreeMap<String, Value> {
    payloads
        .into_iter()
        .map(|payload| (payload["id"].as_str().unwrap_or_default().to_string(), payload))
        .collect()
}

proptest! {
    #[test]
    fn test_put_records_is_idempotent(
        entries in prop::collection::vec(("[a-z]{1,4}", "[A-Za-z ]{0,12}"), 0..30),
    ) {
        let (once, twice) = tokio_test::block_on(async {
            let store = MemoryStore::new();
            let batch = rows(&entries);

            store.put_records(Collection::Events, &batch).await.unwrap();
            let once = store.get_records(Collection::Events).await.unwrap();
            store.put_records(Collection::Events, &batch).await.unwrap();
            let twice = store.get_records(Collection::Events).await.unwrap();
            (once, twice)
        });

        prop_assert_eq!(once, twice);
    }

    #[test]
    fn test_last_write_wins_per_id(
        entries in prop::collection::vec(("[a-c]", "[A-Za-z]{1,8}"), 1..20),
    ) {
        let cached = tokio_test::block_on(async {
            let store = MemoryStore::new();
            for entry in &entries {
                store.put_records(Collection::Events, &rows(std::slice::from_ref(entry))).await.unwrap();
            }
            store.get_records(Collection::Events).await.unwrap()
        });

        let mut expected = BTreeMap::new();
        for (id, title) in &entries {
            expected.insert(id.clone(), event_json(id, title));
        }
        prop_assert_eq!(cached.len(), expected.len());
        prop_assert_eq!(by_id(cached), expected);
    }

    #[test]
    fn test_collections_do_not_share_ids(id in "[a-z]{1,6}") {
        let (events, users) = tokio_test::block_on(async {
            let store = MemoryStore::new();
            let now = chrono::Utc::now();
            store
                .put_records(Collection::Events, &[CachedRecord::new(Collection::Events, id.clone(), event_json(&id, "event"), now)])
                .await
                .unwrap();
            store
                .put_records(Collection::Users, &[CachedRecord::new(Collection::Users, id.clone(), serde_json::json!({"id": id}), now)])
                .await
                .unwrap();
            store.remove_record(Collection::Users, &id).await.unwrap();
            (
                store.get_records(Collection::Events).await.unwrap(),
                store.get_records(Collection::Users).await.unwrap(),
            )
        });

        prop_assert_eq!(events.len(), 1);
        prop_assert!(users.is_empty());
    }
}
