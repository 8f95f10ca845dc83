//! HTTP gateway tests.
//!
//! Handlers are driven through `tower::ServiceExt::oneshot`; one test binds
//! a real socket and speaks raw HTTP/1.1 to the served router.

use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tower::ServiceExt;

use sinkhole_core::config::{ApiConfig, PipelineConfig, PluginConfig};
use sinkhole_core::error::PluginError;
use sinkhole_core::event::{Event, sha256_hex};
use sinkhole_core::ingress::IngressHandle;
use sinkhole_core::lifecycle::PluginManager;
use sinkhole_core::plugin::{Capabilities, Plugin};
use sinkhole_daemon::gateway;
use sinkhole_daemon::plugins::TypeFilter;

const MAX_BODY: usize = 1024;

#[derive(Default)]
struct RecordingSink {
    received: Arc<Mutex<Vec<Arc<Event>>>>,
}

impl Plugin for RecordingSink {
    fn capabilities(&self) -> Capabilities {
        Capabilities::DOWNSTREAM
    }

    async fn init(&mut self, _config: &PluginConfig, _ingress: IngressHandle) -> Result<(), PluginError> {
        Ok(())
    }

    async fn halt(&self) -> Result<(), PluginError> {
        Ok(())
    }

    async fn inbox(&self, event: Arc<Event>) -> Result<(), PluginError> {
        if let Ok(mut received) = self.received.lock() {
            received.push(event);
        }
        Ok(())
    }
}

/// Running manager: `noise` type filter + one recording sink.
async fn running_manager() -> (Arc<PluginManager>, Arc<Mutex<Vec<Arc<Event>>>>) {
    let mut manager = PluginManager::new(PipelineConfig::default());
    manager
        .load_instance(
            &PluginConfig::new("noise-filter", "type_filter").with_setting("deny", vec!["noise"]),
            Box::new(TypeFilter::default()),
        )
        .await
        .unwrap();

    let sink = RecordingSink::default();
    let received = Arc::clone(&sink.received);
    manager
        .load_instance(&PluginConfig::new("sink", "recording"), Box::new(sink))
        .await
        .unwrap();
    manager.start().unwrap();
    (Arc::new(manager), received)
}

fn post_event(body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/v1/event")
        .header("content-type", "application/json")
        .body(body.into())
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn received_len(received: &Arc<Mutex<Vec<Arc<Event>>>>) -> usize {
    received.lock().unwrap().len()
}

#[tokio::test]
async fn index_returns_ok_message() {
    let (manager, _) = running_manager().await;
    let app = gateway::router(manager, MAX_BODY);

    let response = app
        .oneshot(Request::builder().uri("/api/v1/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["message"], "ok");
}

#[tokio::test]
async fn posted_event_reaches_downstream_with_recomputed_digest() {
    // Given: A running pipeline behind the gateway
    let (manager, received) = running_manager().await;
    let app = gateway::router(Arc::clone(&manager), MAX_BODY);

    // When: A client posts an event with a bogus digest
    let body = r#"{
        "type": "email",
        "timestamp": "2024-03-01T12:30:00Z",
        "samples": [{"data": "aGVsbG8=", "sha256": "deadbeef", "filename": "hello.txt"}],
        "source": "smtpd",
        "metadata": {"from": "a@example.com"}
    }"#;
    let response = app.oneshot(post_event(body)).await.unwrap();

    // Then: Accepted, delivered once, digest recomputed from the decoded bytes
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["message"], "ok");

    manager.halt().await.unwrap();
    let received = received.lock().unwrap();
    assert_eq!(received.len(), 1);
    let event = &received[0];
    assert_eq!(event.event_type, "email");
    assert_eq!(event.source, "smtpd");
    assert_eq!(event.samples[0].sha256, sha256_hex(b"hello"));
    assert_eq!(event.samples[0].file_name, "hello.txt");
    assert_eq!(event.metadata()["from"], "a@example.com");
}

#[tokio::test]
async fn malformed_json_is_rejected_and_never_dispatched() {
    let (manager, received) = running_manager().await;
    let app = gateway::router(Arc::clone(&manager), MAX_BODY);

    let response = app.oneshot(post_event("{not json")).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let message = json_body(response).await["message"].as_str().unwrap().to_owned();
    assert!(message.contains("malformed event json"), "got: {message}");

    manager.halt().await.unwrap();
    assert_eq!(received_len(&received), 0);
}

#[tokio::test]
async fn empty_body_is_rejected() {
    let (manager, _) = running_manager().await;
    let app = gateway::router(manager, MAX_BODY);

    let response = app.oneshot(post_event(Body::empty())).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert!(body["message"].as_str().unwrap().contains("request body"));
}

#[tokio::test]
async fn invalid_base64_sample_is_rejected() {
    let (manager, received) = running_manager().await;
    let app = gateway::router(Arc::clone(&manager), MAX_BODY);

    let body = r#"{"type": "email", "samples": [{"data": "%%%", "filename": "x"}]}"#;
    let response = app.oneshot(post_event(body)).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    manager.halt().await.unwrap();
    assert_eq!(received_len(&received), 0);
}

#[tokio::test]
async fn filtered_event_is_still_accepted() {
    // Given: A pipeline whose middleware drops `noise`
    let (manager, received) = running_manager().await;
    let app = gateway::router(Arc::clone(&manager), MAX_BODY);

    // When
    let response = app
        .oneshot(post_event(r#"{"type": "noise", "source": "scanner"}"#))
        .await
        .unwrap();

    // Then: The client sees success, the sink sees nothing
    assert_eq!(response.status(), StatusCode::OK);
    manager.halt().await.unwrap();
    assert_eq!(received_len(&received), 0);
}

#[tokio::test]
async fn oversized_body_is_rejected_by_limit() {
    let (manager, received) = running_manager().await;
    let app = gateway::router(Arc::clone(&manager), MAX_BODY);

    let padding = "x".repeat(MAX_BODY * 2);
    let body = format!(r#"{{"type": "email", "metadata": {{"pad": "{padding}"}}}}"#);
    let response = app.oneshot(post_event(body)).await.unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    manager.halt().await.unwrap();
    assert_eq!(received_len(&received), 0);
}

#[tokio::test]
async fn status_reports_state_plugins_and_ingress() {
    let (manager, _) = running_manager().await;
    let app = gateway::router(manager, MAX_BODY);

    let response = app
        .oneshot(Request::builder().uri("/api/v1/status").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["state"], "running");
    assert!(body["uptime_secs"].is_u64());

    let plugins = body["plugins"].as_array().unwrap();
    assert_eq!(plugins.len(), 2);
    assert_eq!(plugins[0]["name"], "noise-filter");
    assert_eq!(plugins[0]["capabilities"], serde_json::json!(["middleware"]));
    assert_eq!(plugins[1]["name"], "sink");
    assert_eq!(plugins[1]["capabilities"], serde_json::json!(["downstream"]));

    assert_eq!(body["ingress"]["capacity"], 64);
    assert_eq!(body["ingress"]["policy"], "block");
    assert_eq!(body["ingress"]["depth"], 0);
}

#[tokio::test]
async fn status_before_start_has_no_uptime() {
    let manager = Arc::new(PluginManager::new(PipelineConfig::default()));
    let app = gateway::router(manager, MAX_BODY);

    let response = app
        .oneshot(Request::builder().uri("/api/v1/status").body(Body::empty()).unwrap())
        .await
        .unwrap();

    let body = json_body(response).await;
    assert_eq!(body["state"], "unstarted");
    assert!(body["uptime_secs"].is_null());
    assert!(body["plugins"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn post_after_halt_is_service_unavailable() {
    let (manager, _) = running_manager().await;
    manager.halt().await.unwrap();
    let app = gateway::router(manager, MAX_BODY);

    let response = app
        .oneshot(post_event(r#"{"type": "email"}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn spawned_gateway_serves_over_tcp_and_stops_on_shutdown() {
    // Given: The gateway bound to an ephemeral port
    let (manager, _) = running_manager().await;
    let config = ApiConfig {
        enabled: true,
        listen_addr: "127.0.0.1:0".to_owned(),
        max_body_bytes: MAX_BODY,
    };
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let (addr, task) = gateway::spawn_gateway(&config, Arc::clone(&manager), async move {
        let _ = stop_rx.await;
    })
    .await
    .unwrap();
    assert_ne!(addr.port(), 0);

    // When: A raw HTTP/1.1 request is sent
    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /api/v1/ HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();

    // Then: It answers, and exits once shutdown resolves
    assert!(response.starts_with("HTTP/1.1 200"), "got: {response}");
    assert!(response.contains(r#"{"message":"ok"}"#));

    let _ = stop_tx.send(());
    let result = tokio::time::timeout(std::time::Duration::from_secs(2), task)
        .await
        .expect("gateway should stop after shutdown");
    assert!(result.unwrap().is_ok());
    manager.halt().await.unwrap();
}

#[tokio::test]
async fn spawn_gateway_rejects_invalid_listen_addr() {
    let (manager, _) = running_manager().await;
    let config = ApiConfig {
        enabled: true,
        listen_addr: "not-an-addr".to_owned(),
        max_body_bytes: MAX_BODY,
    };

    let result = gateway::spawn_gateway(&config, manager, async {}).await;

    let err = result.expect_err("invalid address").to_string();
    assert!(err.contains("invalid api listen address"), "got: {err}");
}
