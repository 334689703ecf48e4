//! HTTP adapter tests against a mock backend

use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use eventsync::client::config::Config;
use eventsync::client::local_db::{MemoryStore, Store};
use eventsync::client::offline::SyncCoordinator;
use eventsync::client::remote::{FetchQuery, HttpRemote, RemoteApi, RemoteErrorKind};
use eventsync::client::sync::{ConnectivitySource, HttpProbe, NetworkMonitor};
use eventsync::shared::Collection;

use crate::common::*;
use crate::assert_replayed;

fn remote_for(server: &MockServer) -> HttpRemote {
    let config = Config::from_toml_str(&format!(
        "[remote]\nurl = \"{}\"\ntoken = \"secret\"\n",
        server.uri()
    ))
    .unwrap();
    HttpRemote::new(&config).unwrap()
}

#[tokio::test]
async fn test_fetch_sends_query_and_reads_total() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/events"))
        .and(query_param("limit", "2"))
        .and(query_param("offset", "4"))
        .and(query_param("category", "music"))
        .and(query_param("fields", "id,title"))
        .and(header("authorization", "Bearer secret"))
        .and(header("prefer", "count=exact"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Range", "4-5/57")
                .set_body_json(json!([event_json("e5", "Five"), event_json("e6", "Six")])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let query = FetchQuery {
        limit: Some(2),
        offset: 4,
        fields: Some(vec!["id".into(), "title".into()]),
        category: Some("music".into()),
        upcoming_only: false,
    };
    let page = remote_for(&server).fetch(Collection::Events, &query).await.unwrap();

    assert_eq!(page.records.len(), 2);
    assert_eq!(page.records[1]["id"], "e6");
    assert_eq!(page.total_count, Some(57));
}

#[tokio::test]
async fn test_fetch_falls_back_to_total_count_header() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("X-Total-Count", "3")
                .set_body_json(json!([{"id": "u1"}])),
        )
        .mount(&server)
        .await;

    let page = remote_for(&server)
        .fetch(Collection::Users, &FetchQuery::default())
        .await
        .unwrap();
    assert_eq!(page.total_count, Some(3));
}

#[tokio::test]
async fn test_create_returns_representation() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/events"))
        .and(header("prefer", "return=representation"))
        .and(body_json(json!({"id": "e1", "title": "Event e1"})))
        .respond_with(
            ResponseTemplate::new(201)
                .set_body_json(json!([{"id": "e1", "title": "Event e1", "updated_at": "2026-01-01T00:00:00Z"}])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let stored = remote_for(&server).apply(&create_event("e1")).await.unwrap();

    let stored = stored.unwrap();
    assert_eq!(stored["id"], "e1");
    assert_eq!(stored["updated_at"], "2026-01-01T00:00:00Z");
}

#[tokio::test]
async fn test_update_targets_record_path() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/events/e1"))
        .and(body_json(json!({"id": "e1", "title": "Renamed"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let stored = remote_for(&server).apply(&update_event("e1")).await.unwrap();
    assert_eq!(stored, None);
}

#[tokio::test]
async fn test_delete_with_no_content() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/events/e2"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let stored = remote_for(&server).apply(&delete_event("e2")).await.unwrap();
    assert_eq!(stored, None);
}

#[tokio::test]
async fn test_record_id_is_percent_encoded() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/events/a%2Fb%3Fx=1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let stored = remote_for(&server).apply(&delete_event("a/b?x=1")).await.unwrap();
    assert_eq!(stored, None);
}

#[tokio::test]
async fn test_error_responses_are_classified() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/events/rls"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "code": "42501",
            "message": "new row violates row-level security policy"
        })))
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/events/forbidden"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/events/down"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;
    let remote = remote_for(&server);

    let err = remote.apply(&update_event("rls")).await.unwrap_err();
    assert_eq!(err.kind, RemoteErrorKind::PolicyViolation);
    assert!(err.message.contains("row-level security"));

    let err = remote.apply(&update_event("forbidden")).await.unwrap_err();
    assert_eq!(err.kind, RemoteErrorKind::PermissionDenied);
    assert!(!err.kind.is_recoverable());

    let err = remote.apply(&update_event("down")).await.unwrap_err();
    assert_eq!(err.kind, RemoteErrorKind::Server);
    assert!(err.kind.is_recoverable());
    assert!(err.message.contains("maintenance"));
}

#[tokio::test]
async fn test_unreachable_backend_is_a_network_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = Config::from_toml_str(&format!("[remote]\nurl = \"http://{addr}\"\n")).unwrap();
    let remote = HttpRemote::new(&config).unwrap();

    let err = remote.apply(&create_event("e1")).await.unwrap_err();
    assert_eq!(err.kind, RemoteErrorKind::Network);
}

#[tokio::test]
async fn test_health_probe_reports_connectivity() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/down"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let up = HttpProbe::new(format!("{}/health", server.uri()), Duration::from_secs(2)).unwrap();
    let reading = up.check().await;
    assert!(reading.is_online);

    let down = HttpProbe::new(format!("{}/down", server.uri()), Duration::from_secs(2)).unwrap();
    assert!(!down.check().await.is_online);
}

#[tokio::test]
async fn test_queued_writes_replay_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/events"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([{"id": "e1", "title": "From server"}])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/events/e9"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let monitor = NetworkMonitor::new();
    let coordinator = SyncCoordinator::new(
        store.clone(),
        Arc::new(remote_for(&server)),
        monitor.clone(),
        fast_config(),
    );

    assert!(coordinator.queue_operation(create_event("e1")).await.unwrap().is_queued());
    assert!(coordinator.queue_operation(delete_event("e9")).await.unwrap().is_queued());

    monitor.set_online(true);
    let report = assert_replayed!(coordinator.process_queue().await);

    assert_eq!(report.succeeded, 2);
    let cached = store.get_records(Collection::Events).await.unwrap();
    assert_eq!(cached, vec![json!({"id": "e1", "title": "From server"})]);
}
