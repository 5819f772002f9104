//! Integration tests for offline queueing through the request pipeline
//!
//! **Coverage:**
//! - Network failure defers a write; reconnecting replays it with a fresh token
//! - Replay order (priority, then FIFO) and per-status outcomes
//! - Client errors are never queued; gateway errors are queued only offline
//! - Queued entries survive a restart through the file store

#![allow(dead_code)]

#[path = "support.rs"]
mod support;

use std::sync::Arc;

use resilink_core::{CredentialProvider, KeyValueStore};
use resilink_domain::{ApiError, ApiRequest, RequestContext, ResponseSource};
use resilink_infra::{FileStore, InMemoryCredentials, MemoryStore, RequestPipeline};
use serde_json::json;
use support::{eventually, test_config, OfflineRig};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount(server: &MockServer, route: &str, status: u16) {
    Mock::given(path(route)).respond_with(ResponseTemplate::new(status)).mount(server).await;
}

fn memory() -> Arc<dyn KeyValueStore> {
    Arc::new(MemoryStore::new())
}

#[tokio::test]
async fn test_offline_write_replayed_on_reconnect() {
    support::init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/notes"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let credentials = Arc::new(InMemoryCredentials::with_token("access_token", "secret"));
    let builder = RequestPipeline::builder(test_config(&server.uri()))
        .credentials(credentials as Arc<dyn CredentialProvider>);
    let rig = OfflineRig::with(builder, memory(), false);
    rig.pipeline.initialize().await.unwrap();

    let response = rig.pipeline.post("/notes", &json!({"title": "draft"})).await.unwrap();
    assert_eq!(response.status, 202);
    assert_eq!(response.source, ResponseSource::Queued);
    assert!(response.queued_id().is_some());

    let queue = rig.pipeline.queue();
    assert_eq!(queue.len(), 1);
    assert!(!queue.pending()[0].request.headers.contains("authorization"));
    assert!(server.received_requests().await.unwrap().is_empty());

    rig.go_online();
    let server = &server;
    assert!(
        eventually(|| async move { server.received_requests().await.unwrap().len() == 1 }).await
    );
    assert!(eventually(|| async move { queue.is_empty() }).await);

    let replayed = &server.received_requests().await.unwrap()[0];
    assert_eq!(replayed.headers.get("authorization").unwrap(), "Bearer secret");
    assert_eq!(replayed.body, br#"{"title":"draft"}"#);
    assert_eq!(queue.stats().total_replayed, 1);

    rig.pipeline.dispose().await;
}

#[tokio::test]
async fn test_replay_order_and_outcomes() {
    support::init_tracing();
    let server = MockServer::start().await;
    for route in ["/a", "/b", "/c"] {
        mount(&server, route, 201).await;
    }
    mount(&server, "/gone", 404).await;
    mount(&server, "/boom", 500).await;

    let rig = OfflineRig::new(test_config(&server.uri()), memory(), false);
    for (route, priority) in [("/a", 0), ("/b", 5), ("/gone", 1), ("/c", 0), ("/boom", -1)] {
        let response = rig
            .pipeline
            .execute_with(ApiRequest::post(route), RequestContext::new().with_priority(priority))
            .await
            .unwrap();
        assert!(response.is_queued());
    }
    assert_eq!(rig.pipeline.queue().len(), 5);

    rig.transport.set_down(false);
    rig.connectivity.set_online(true);
    let report = rig.pipeline.queue().flush().await;

    assert_eq!(report.attempted, 5);
    assert_eq!(report.succeeded, 3);
    assert_eq!(report.dropped_terminal, 1);
    assert_eq!(report.requeued, 1);

    let order: Vec<String> = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(|request| request.url.path().to_string())
        .collect();
    assert_eq!(order, vec!["/b", "/gone", "/a", "/c", "/boom"]);

    let pending = rig.pipeline.queue().pending();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].request.path, "/boom");
}

#[tokio::test]
async fn test_client_error_is_not_queued() {
    support::init_tracing();
    let server = MockServer::start().await;
    mount(&server, "/reject", 422).await;

    let rig = OfflineRig::new(test_config(&server.uri()), memory(), true);
    let err = rig.pipeline.post("/reject", &json!({"bad": true})).await.unwrap_err();

    assert!(matches!(err, ApiError::Client { status: 422, .. }));
    assert!(rig.pipeline.queue().is_empty());
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_gateway_error_queued_only_while_offline() {
    support::init_tracing();
    let server = MockServer::start().await;
    mount(&server, "/flaky", 503).await;

    // Reachable server, but the connectivity signal reports offline
    let rig = OfflineRig::new(test_config(&server.uri()), memory(), false);
    rig.transport.set_down(false);

    let request = ApiRequest::post("/flaky").with_json(&json!({"n": 1})).unwrap();
    let response = rig
        .pipeline
        .execute_with(request, RequestContext::new().allow_non_idempotent_retry())
        .await
        .unwrap();

    assert!(response.is_queued());
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
    assert_eq!(rig.pipeline.queue().len(), 1);

    rig.connectivity.set_online(true);
    let err = rig.pipeline.post("/flaky", &json!({"n": 2})).await.unwrap_err();
    assert!(matches!(err, ApiError::Server { status: 503, .. }));
    assert_eq!(rig.pipeline.queue().len(), 1);
}

#[tokio::test]
async fn test_queue_survives_restart() {
    support::init_tracing();
    let server = MockServer::start().await;
    mount(&server, "/notes", 201).await;
    let dir = TempDir::new().unwrap();

    let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::open(dir.path()).await.unwrap());
    let first = OfflineRig::new(test_config(&server.uri()), store, false);
    first.pipeline.initialize().await.unwrap();
    first.pipeline.post("/notes", &json!({"title": "kept"})).await.unwrap();
    first.pipeline.dispose().await;
    assert!(first.pipeline.queue().is_empty());

    let reopened: Arc<dyn KeyValueStore> = Arc::new(FileStore::open(dir.path()).await.unwrap());
    let second = OfflineRig::new(test_config(&server.uri()), reopened, true);
    second.pipeline.initialize().await.unwrap();

    let server = &server;
    assert!(
        eventually(|| async move { server.received_requests().await.unwrap().len() == 1 }).await
    );
    let queue = second.pipeline.queue();
    assert!(eventually(|| async move { queue.is_empty() }).await);
    assert_eq!(server.received_requests().await.unwrap()[0].body, br#"{"title":"kept"}"#);

    second.pipeline.dispose().await;
}
