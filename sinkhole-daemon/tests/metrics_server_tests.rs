//! Metrics endpoint tests.
//!
//! Every test renders through its own local recorder; none installs the
//! process-wide one.

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tower::ServiceExt;

use sinkhole_core::config::{MetricsConfig, PipelineConfig};
use sinkhole_core::lifecycle::PluginManager;
use sinkhole_core::metrics as m;
use sinkhole_daemon::metrics_server;

async fn body_text(response: axum::response::Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn endpoint_renders_pipeline_counters_at_configured_path() {
    // Given: A delivery counter recorded for one plugin
    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();
    metrics::with_local_recorder(&recorder, || {
        metrics::counter!(m::DELIVERIES_TOTAL, m::LABEL_PLUGIN => "log-sink").increment(2);
    });
    let app = metrics_server::router(handle, "/prometheus");

    // When
    let response = app
        .clone()
        .oneshot(Request::builder().uri("/prometheus").body(Body::empty()).unwrap())
        .await
        .unwrap();

    // Then
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap().to_owned();
    assert!(content_type.starts_with("text/plain"), "got: {content_type}");
    let text = body_text(response).await;
    assert!(
        text.contains(r#"sinkhole_deliveries_total{plugin="log-sink"} 2"#),
        "got: {text}"
    );

    let other = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(other.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn runtime_gauges_report_pipeline_uptime() {
    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();
    let mut manager = PluginManager::new(PipelineConfig::default());

    // Not started yet: nothing to report
    metrics::with_local_recorder(&recorder, || metrics_server::record_runtime_gauges(&manager));
    assert!(!handle.render().contains(m::DAEMON_UPTIME_SECONDS));

    manager.start().unwrap();
    metrics::with_local_recorder(&recorder, || metrics_server::record_runtime_gauges(&manager));
    assert!(handle.render().contains(m::DAEMON_UPTIME_SECONDS));

    manager.halt().await.unwrap();
}

#[tokio::test]
async fn spawned_endpoint_serves_over_tcp_until_shutdown() {
    // Given: The endpoint bound to an ephemeral port
    let config = MetricsConfig {
        enabled: true,
        listen_addr: "127.0.0.1".to_owned(),
        port: 0,
        endpoint: "/metrics".to_owned(),
    };
    let handle = PrometheusBuilder::new().build_recorder().handle();
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let (addr, task) = metrics_server::spawn_metrics_server(&config, handle, async move {
        let _ = stop_rx.await;
    })
    .await
    .unwrap();
    assert_ne!(addr.port(), 0);

    // When
    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /metrics HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();

    // Then
    assert!(response.starts_with("HTTP/1.1 200"), "got: {response}");
    let _ = stop_tx.send(());
    let result = tokio::time::timeout(std::time::Duration::from_secs(2), task)
        .await
        .expect("endpoint should stop after shutdown");
    assert!(result.unwrap().is_ok());
}

#[tokio::test]
async fn invalid_listen_addr_is_rejected() {
    let config = MetricsConfig {
        enabled: true,
        listen_addr: "999.999.999.999".to_owned(),
        port: 9100,
        endpoint: "/metrics".to_owned(),
    };
    let handle = PrometheusBuilder::new().build_recorder().handle();

    let result = metrics_server::spawn_metrics_server(&config, handle, async {}).await;

    let err = result.expect_err("invalid address").to_string();
    assert!(err.contains("invalid metrics listen address"), "got: {err}");
}
