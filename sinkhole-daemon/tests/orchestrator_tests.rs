//! Orchestrator build and run tests.

use std::io::Write;
use std::time::Duration;

use sinkhole_core::config::{PluginConfig, SinkholeConfig};
use sinkhole_core::lifecycle::LifecycleState;
use sinkhole_daemon::orchestrator::Orchestrator;

const EXAMPLE: &str = include_str!("../../sinkhole.toml.example");

/// Example config made safe for tests: no PID file, no gateway.
fn test_config() -> SinkholeConfig {
    let mut config = SinkholeConfig::parse(EXAMPLE).expect("example parses");
    config.general.pid_file = String::new();
    config.api.enabled = false;
    config
}

fn temp_pid_path(tag: &str) -> std::path::PathBuf {
    std::env::temp_dir()
        .join(format!("sinkhole_orch_{}_{}", tag, std::process::id()))
        .join("sinkhole.pid")
}

#[tokio::test]
async fn build_from_example_config_loads_all_plugins() {
    // Given: The shipped example configuration
    let config = test_config();

    // When
    let orchestrator = Orchestrator::build_from_config(config).await.unwrap();

    // Then: Every declared plugin is loaded and the pipeline is running
    let manager = orchestrator.manager();
    assert_eq!(manager.state(), LifecycleState::Running);
    assert_eq!(
        orchestrator.load_report().loaded,
        vec!["heartbeat", "noise-filter", "tagger", "log-sink"]
    );
    assert!(orchestrator.load_report().failed.is_empty());

    let names: Vec<String> = manager.plugins().into_iter().map(|p| p.name).collect();
    assert_eq!(names, vec!["heartbeat", "noise-filter", "tagger", "log-sink"]);

    manager.halt().await.unwrap();
}

#[tokio::test]
async fn build_rejects_invalid_config() {
    let mut config = test_config();
    config.pipeline.ingress_capacity = 0;

    let result = Orchestrator::build_from_config(config).await;

    let err = result.err().expect("zero capacity is invalid").to_string();
    assert!(err.contains("config validation failed"), "got: {err}");
}

#[tokio::test]
async fn unknown_plugin_kind_is_skipped_not_fatal() {
    let mut config = test_config();
    config.plugins.push(PluginConfig::new("ftp", "ftpd"));

    let orchestrator = Orchestrator::build_from_config(config).await.unwrap();

    assert_eq!(orchestrator.load_report().loaded.len(), 4);
    assert_eq!(orchestrator.load_report().failed.len(), 1);
    assert_eq!(orchestrator.manager().plugin_count(), 4);
    orchestrator.manager().halt().await.unwrap();
}

#[tokio::test]
async fn disabled_plugins_are_not_loaded() {
    let mut config = test_config();
    config.plugins[0].enabled = false;

    let orchestrator = Orchestrator::build_from_config(config).await.unwrap();

    assert_eq!(orchestrator.manager().plugin_count(), 3);
    assert!(orchestrator.manager().plugins().iter().all(|p| p.name != "heartbeat"));
    orchestrator.manager().halt().await.unwrap();
}

#[tokio::test]
async fn build_from_path_loads_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(b"[api]\nenabled = false\n[general]\npid_file = \"\"\n[[plugins]]\nname = \"log\"\nkind = \"log_sink\"\n")
        .unwrap();

    let orchestrator = Orchestrator::build(file.path()).await.unwrap();

    assert_eq!(orchestrator.manager().plugin_count(), 1);
    assert!(!orchestrator.config().api.enabled);
    orchestrator.manager().halt().await.unwrap();
}

#[tokio::test]
async fn build_from_missing_path_fails() {
    let result = Orchestrator::build(std::path::Path::new("/nonexistent/sinkhole.toml")).await;
    let err = result.err().expect("missing file").to_string();
    assert!(err.contains("failed to load config"), "got: {err}");
}

#[tokio::test]
async fn run_until_signal_writes_and_removes_pid_file_and_halts() {
    // Given: A gateway on an ephemeral port and a PID file in a temp dir
    let pid_path = temp_pid_path("run");
    let mut config = test_config();
    config.general.pid_file = pid_path.to_string_lossy().into_owned();
    config.api.enabled = true;
    config.api.listen_addr = "127.0.0.1:0".to_owned();

    let mut orchestrator = Orchestrator::build_from_config(config).await.unwrap();
    let manager = std::sync::Arc::clone(orchestrator.manager());

    // When: The shutdown signal fires after the PID file appears
    let watched = pid_path.clone();
    let signal = async move {
        for _ in 0..100 {
            if watched.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(watched.exists(), "PID file should exist while running");
        Ok::<_, anyhow::Error>("TEST")
    };
    let report = orchestrator.run_until(signal).await.unwrap();

    // Then: Every plugin halted and the PID file is gone
    assert!(report.is_clean());
    assert_eq!(report.halted.len(), 4);
    assert_eq!(manager.state(), LifecycleState::Halted);
    assert!(!pid_path.exists());

    if let Some(parent) = pid_path.parent() {
        let _ = std::fs::remove_dir_all(parent);
    }
}

#[tokio::test]
async fn run_fails_on_existing_pid_file_and_still_halts_plugins() {
    // Given: A PID file left by another instance
    let pid_path = temp_pid_path("dup");
    std::fs::create_dir_all(pid_path.parent().unwrap()).unwrap();
    std::fs::write(&pid_path, "4242").unwrap();

    let mut config = test_config();
    config.general.pid_file = pid_path.to_string_lossy().into_owned();
    let mut orchestrator = Orchestrator::build_from_config(config).await.unwrap();

    // When
    let result = orchestrator.run_until(async { Ok::<_, anyhow::Error>("TEST") }).await;

    // Then
    let err = result.err().expect("duplicate instance").to_string();
    assert!(err.contains("4242"), "got: {err}");
    assert_eq!(orchestrator.manager().state(), LifecycleState::Halted);
    assert!(pid_path.exists(), "a foreign PID file is left alone");

    let _ = std::fs::remove_dir_all(pid_path.parent().unwrap());
}

#[tokio::test]
async fn run_fails_when_gateway_cannot_bind() {
    // Given: A port already taken by another listener
    let blocker = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let mut config = test_config();
    config.api.enabled = true;
    config.api.listen_addr = blocker.local_addr().unwrap().to_string();
    let mut orchestrator = Orchestrator::build_from_config(config).await.unwrap();

    // When
    let result = orchestrator.run_until(async { Ok::<_, anyhow::Error>("TEST") }).await;

    // Then: Startup fails and the plugins are halted
    let err = result.err().expect("port in use").to_string();
    assert!(err.contains("failed to bind"), "got: {err}");
    assert_eq!(orchestrator.manager().state(), LifecycleState::Halted);
}

// Installs the process-wide recorder; the only test in this binary that enables metrics.
#[tokio::test]
async fn run_with_metrics_serves_and_stops_endpoint() {
    let mut config = test_config();
    config.metrics.enabled = true;
    config.metrics.port = 0;
    config.metrics.endpoint = "/prometheus".to_owned();
    let mut orchestrator = Orchestrator::build_from_config(config).await.unwrap();

    let report = orchestrator
        .run_until(async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok::<_, anyhow::Error>("TEST")
        })
        .await
        .unwrap();

    assert!(report.is_clean());
    assert_eq!(orchestrator.manager().state(), LifecycleState::Halted);
}
