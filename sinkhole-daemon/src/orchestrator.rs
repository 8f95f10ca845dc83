//! Daemon orchestration -- plugin loading, gateway wiring, and lifecycle management.
//!
//! The [`Orchestrator`] is the central coordinator of `sinkhole-daemon`.
//! It loads the configured plugins through the built-in catalog, starts the
//! dispatcher, serves the HTTP gateway, and runs until a shutdown signal.
//!
//! # Startup Order
//!
//! 1. Metrics recorder (when enabled)
//! 2. Plugins, `init` in declared order (failures are logged and skipped)
//! 3. Dispatcher loop
//! 4. PID file, HTTP gateway, metrics endpoint and its upkeep task
//!
//! # Shutdown Order
//!
//! 1. HTTP gateway (no new `emit_event` calls) and metrics endpoint
//! 2. Ingress queue closed, dispatcher drains what is queued
//! 3. In-flight deliveries, bounded by `drain_timeout_secs`
//! 4. Every plugin's `halt`, concurrently, bounded by `halt_timeout_secs`

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use sinkhole_core::config::SinkholeConfig;
use sinkhole_core::lifecycle::{LoadReport, PluginManager};
use sinkhole_core::registry::{HaltReport, PluginCatalog};

use crate::gateway;
use crate::metrics_server;
use crate::pidfile::PidFile;
use crate::plugins;

type ServerTask = JoinHandle<Result<()>>;

/// The main daemon orchestrator.
pub struct Orchestrator {
    /// Loaded and validated configuration.
    config: SinkholeConfig,
    /// Running plugin manager, shared with the gateway.
    manager: Arc<PluginManager>,
    /// Result of the load phase.
    load_report: LoadReport,
    /// Prometheus handle, present when metrics are enabled.
    metrics: Option<PrometheusHandle>,
    /// Shutdown broadcast sender (signals all background tasks).
    shutdown_tx: broadcast::Sender<()>,
}

impl Orchestrator {
    /// Load configuration and build the orchestrator.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be loaded or validated,
    /// or if the plugin manager cannot start.
    pub async fn build(config_path: &Path) -> Result<Self> {
        let config = SinkholeConfig::load(config_path)
            .await
            .map_err(|e| anyhow::anyhow!("failed to load config: {}", e))?;
        Self::build_from_config(config).await
    }

    /// Build from an already-loaded configuration using the built-in catalog.
    pub async fn build_from_config(config: SinkholeConfig) -> Result<Self> {
        Self::build_with_catalog(config, &plugins::builtin_catalog()).await
    }

    /// Build from a configuration and an explicit plugin catalog.
    ///
    /// Plugins are loaded and the dispatcher is started before this returns;
    /// upstream plugins may begin submitting events immediately.
    pub async fn build_with_catalog(
        config: SinkholeConfig,
        catalog: &PluginCatalog,
    ) -> Result<Self> {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

        // Install metrics recorder before plugin initialization
        let metrics = if config.metrics.enabled {
            Some(metrics_server::install_recorder()?)
        } else {
            None
        };

        let mut manager = PluginManager::new(config.pipeline.clone());
        let plugin_configs = config.effective_plugins();
        tracing::info!(declared = plugin_configs.len(), "loading plugins");

        let load_report = manager
            .load_all(catalog, &plugin_configs)
            .await
            .map_err(|e| anyhow::anyhow!("failed to load plugins: {}", e))?;
        for failure in &load_report.failed {
            tracing::warn!(error = %failure, "plugin skipped");
        }

        manager
            .start()
            .map_err(|e| anyhow::anyhow!("failed to start plugin manager: {}", e))?;

        let (shutdown_tx, _) = broadcast::channel(16);

        tracing::info!(
            total_plugins = manager.plugin_count(),
            "orchestrator initialized"
        );

        if config.metrics.enabled {
            record_daemon_metrics(manager.plugin_count());
        }

        Ok(Self {
            config,
            manager: Arc::new(manager),
            load_report,
            metrics,
            shutdown_tx,
        })
    }

    /// Serve until `SIGTERM` or `SIGINT`, then shut down.
    pub async fn run(&mut self) -> Result<HaltReport> {
        self.run_until(wait_for_shutdown_signal()).await
    }

    /// Serve until `signal` resolves, then shut down.
    ///
    /// `signal` yields the name of the trigger for logging.
    pub async fn run_until<F>(&mut self, signal: F) -> Result<HaltReport>
    where
        F: Future<Output = Result<&'static str>>,
    {
        let pid_file = match self.pid_file().map(|path| PidFile::acquire(path)).transpose() {
            Ok(pid_file) => pid_file,
            Err(e) => {
                self.shutdown(Vec::new()).await;
                return Err(e);
            }
        };

        let mut servers = Vec::new();
        if let Err(e) = self.spawn_servers(&mut servers).await {
            self.shutdown(servers).await;
            return Err(e);
        }

        let upkeep_task = self.metrics.clone().map(|handle| {
            metrics_server::spawn_upkeep(
                Arc::clone(&self.manager),
                handle,
                self.shutdown_tx.subscribe(),
            )
        });

        tracing::info!("sinkhole-daemon running");
        let signal = signal.await;
        match &signal {
            Ok(name) => tracing::info!(signal = name, "shutdown signal received"),
            Err(e) => tracing::error!(error = %e, "failed to wait for shutdown signal"),
        }

        let report = self.shutdown(servers).await;
        if let Some(task) = upkeep_task {
            let _ = task.await;
        }
        drop(pid_file);
        signal.map(|_| report)
    }

    /// Start the HTTP gateway and the metrics endpoint, as configured.
    ///
    /// Servers that started are pushed to `servers` even when a later one fails.
    async fn spawn_servers(&self, servers: &mut Vec<(&'static str, ServerTask)>) -> Result<()> {
        if self.config.api.enabled {
            let (_, task) = gateway::spawn_gateway(
                &self.config.api,
                Arc::clone(&self.manager),
                self.shutdown_future(),
            )
            .await?;
            servers.push(("api gateway", task));
        } else {
            tracing::info!("api gateway disabled in configuration");
        }

        if let Some(handle) = &self.metrics {
            let (_, task) = metrics_server::spawn_metrics_server(
                &self.config.metrics,
                handle.clone(),
                self.shutdown_future(),
            )
            .await?;
            servers.push(("metrics endpoint", task));
        }
        Ok(())
    }

    fn shutdown_future(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        async move {
            let _ = shutdown_rx.recv().await;
        }
    }

    /// Stop the servers, then halt the plugin manager.
    async fn shutdown(&self, servers: Vec<(&'static str, ServerTask)>) -> HaltReport {
        tracing::info!("broadcasting shutdown signal to all tasks");
        let _ = self.shutdown_tx.send(());

        for (server, task) in servers {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!(server, error = %e, "server exited with error"),
                Err(e) => tracing::error!(server, error = %e, "server task panicked"),
            }
        }

        tracing::info!("halting all plugins");
        match self.manager.halt().await {
            Ok(report) => {
                if !report.is_clean() {
                    for (name, reason) in &report.failed {
                        tracing::warn!(plugin = %name, reason = %reason, "plugin did not halt cleanly");
                    }
                }
                report
            }
            Err(e) => {
                tracing::warn!(error = %e, "plugin manager was not running");
                HaltReport::default()
            }
        }
    }

    fn pid_file(&self) -> Option<&Path> {
        let pid_file = self.config.general.pid_file.as_str();
        (!pid_file.is_empty()).then(|| Path::new(pid_file))
    }

    /// The shared plugin manager.
    pub fn manager(&self) -> &Arc<PluginManager> {
        &self.manager
    }

    /// Plugins loaded and skipped during build.
    pub fn load_report(&self) -> &LoadReport {
        &self.load_report
    }

    /// Get a reference to the loaded configuration.
    pub fn config(&self) -> &SinkholeConfig {
        &self.config
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
///
/// Returns the name of the signal that triggered the shutdown.
///
/// # Errors
///
/// Returns an error if signal handlers cannot be installed.
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("failed to install SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("failed to install SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Record daemon-level metrics (build info).
fn record_daemon_metrics(plugin_count: usize) {
    use sinkhole_core::metrics as m;

    metrics::gauge!(m::DAEMON_BUILD_INFO, "version" => env!("CARGO_PKG_VERSION")).set(1.0);

    tracing::debug!(
        plugin_count = plugin_count,
        version = env!("CARGO_PKG_VERSION"),
        "daemon metrics recorded"
    );
}
