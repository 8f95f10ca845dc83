//! Prometheus scrape endpoint.
//!
//! The recorder is installed before any plugin is initialised so load
//! failures are counted. Rendering is served by a small `axum` router on
//! `[metrics] listen_addr:port` at `[metrics] endpoint`, separate from the
//! event gateway, and stops on the same shutdown signal.
//!
//! ```ignore
//! let handle = metrics_server::install_recorder()?;
//! let (addr, task) = metrics_server::spawn_metrics_server(&config, handle, shutdown).await?;
//! ```

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::Router;
use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use sinkhole_core::config::MetricsConfig;
use sinkhole_core::lifecycle::PluginManager;
use sinkhole_core::metrics as m;

/// How often gauges derived from the manager are refreshed.
pub const UPKEEP_INTERVAL: Duration = Duration::from_secs(10);

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// Install the process-wide Prometheus recorder and describe every metric.
///
/// # Errors
///
/// Fails when a global recorder is already installed.
pub fn install_recorder() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("failed to install metrics recorder: {}", e))?;
    m::describe_all();
    Ok(handle)
}

/// Router rendering `handle` at `endpoint`.
pub fn router(handle: PrometheusHandle, endpoint: &str) -> Router {
    Router::new()
        .route(endpoint, get(render))
        .with_state(handle)
}

async fn render(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    ([(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)], handle.render())
}

/// Bind the scrape listener and serve until `shutdown` resolves.
///
/// # Errors
///
/// - `listen_addr:port` is not a socket address
/// - The socket cannot be bound
pub async fn spawn_metrics_server<F>(
    config: &MetricsConfig,
    handle: PrometheusHandle,
    shutdown: F,
) -> Result<(SocketAddr, JoinHandle<Result<()>>)>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr: SocketAddr = format!("{}:{}", config.listen_addr, config.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid metrics listen address: {}", e))?;
    if addr.ip().is_unspecified() {
        tracing::warn!(
            listen_addr = %addr,
            "metrics endpoint is exposed on all interfaces"
        );
    }

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("failed to bind metrics endpoint on {}: {}", addr, e))?;
    let bound = listener.local_addr()?;
    let app = router(handle, &config.endpoint);

    tracing::info!(listen_addr = %bound, endpoint = %config.endpoint, "metrics endpoint listening");
    let task = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| anyhow::anyhow!("metrics endpoint failed: {}", e))
    });
    Ok((bound, task))
}

/// Set the gauges that are sampled rather than updated in place.
pub fn record_runtime_gauges(manager: &PluginManager) {
    if let Some(uptime) = manager.uptime() {
        metrics::gauge!(m::DAEMON_UPTIME_SECONDS).set(uptime.as_secs_f64());
    }
}

/// Refresh sampled gauges and let the recorder drain its histogram
/// buckets every [`UPKEEP_INTERVAL`], until shutdown.
pub fn spawn_upkeep(
    manager: Arc<PluginManager>,
    handle: PrometheusHandle,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(UPKEEP_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    record_runtime_gauges(&manager);
                    handle.run_upkeep();
                }
                _ = shutdown_rx.recv() => break,
            }
        }
        tracing::debug!("metrics upkeep stopped");
    })
}
