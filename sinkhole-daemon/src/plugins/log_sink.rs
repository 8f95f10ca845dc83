//! `log_sink`: writes one structured log record per delivered event.
//!
//! ```toml
//! [[plugins]]
//! name = "log-sink"
//! kind = "log_sink"
//!
//! [plugins.config]
//! include_metadata = true
//! skip_types = ["heartbeat"]
//! log_level = "info"
//! ```
//!
//! Records are written at `info`, so a `log_level` of `warn` or `error`
//! silences the sink without unloading it.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Deserialize;
use tracing::Level;

use sinkhole_core::config::PluginConfig;
use sinkhole_core::error::PluginError;
use sinkhole_core::event::Event;
use sinkhole_core::ingress::IngressHandle;
use sinkhole_core::plugin::{Capabilities, Plugin};

use super::Verbosity;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LogSinkSettings {
    include_metadata: bool,
    skip_types: Vec<String>,
}

/// Downstream plugin that logs every event it receives at `info`.
#[derive(Debug, Default)]
pub struct LogSink {
    name: String,
    include_metadata: bool,
    skip_types: HashSet<String>,
    verbosity: Verbosity,
    logged: AtomicU64,
    skipped: AtomicU64,
}

impl LogSink {
    /// Number of events written to the log.
    pub fn logged(&self) -> u64 {
        self.logged.load(Ordering::Relaxed)
    }

    /// Number of events not written, either listed in `skip_types` or
    /// below the instance's `log_level`.
    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }
}

impl Plugin for LogSink {
    fn capabilities(&self) -> Capabilities {
        Capabilities::DOWNSTREAM
    }

    async fn init(&mut self, config: &PluginConfig, _ingress: IngressHandle) -> Result<(), PluginError> {
        let settings: LogSinkSettings = config.settings()?;
        self.name.clone_from(&config.name);
        self.include_metadata = settings.include_metadata;
        self.skip_types = settings.skip_types.into_iter().collect();
        self.verbosity = Verbosity::from_config(config)?;
        tracing::debug!(
            plugin = %self.name,
            include_metadata = self.include_metadata,
            skip_types = self.skip_types.len(),
            "log sink initialized"
        );
        Ok(())
    }

    async fn halt(&self) -> Result<(), PluginError> {
        tracing::info!(
            plugin = %self.name,
            logged = self.logged(),
            skipped = self.skipped(),
            "log sink halted"
        );
        Ok(())
    }

    async fn inbox(&self, event: Arc<Event>) -> Result<(), PluginError> {
        if self.skip_types.contains(&event.event_type) || !self.verbosity.allows(Level::INFO) {
            self.skipped.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }

        let digests = event.sample_digests().join(",");
        if self.include_metadata {
            tracing::info!(
                plugin = %self.name,
                event_type = %event.event_type,
                source = %event.source,
                timestamp = %event.timestamp.to_rfc3339(),
                samples = event.samples.len(),
                digests = %digests,
                metadata = %event.metadata(),
                "event received"
            );
        } else {
            tracing::info!(
                plugin = %self.name,
                event_type = %event.event_type,
                source = %event.source,
                timestamp = %event.timestamp.to_rfc3339(),
                samples = event.samples.len(),
                digests = %digests,
                "event received"
            );
        }
        self.logged.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
