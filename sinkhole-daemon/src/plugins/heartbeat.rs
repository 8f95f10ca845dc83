//! `heartbeat`: periodically submits `heartbeat` events into the pipeline.
//!
//! The producer task owns a clone of the ingress handle and exits when
//! the plugin is halted or the ingress queue closes.

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Level;

use sinkhole_core::config::PluginConfig;
use sinkhole_core::error::{IngressError, PluginError};
use sinkhole_core::event::{EVENT_TYPE_HEARTBEAT, Event};
use sinkhole_core::ingress::IngressHandle;
use sinkhole_core::plugin::{Capabilities, Plugin};

use super::Verbosity;

#[derive(Debug, Deserialize)]
#[serde(default)]
struct HeartbeatSettings {
    interval_secs: f64,
    source: String,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            interval_secs: 60.0,
            source: "sinkhole".to_owned(),
        }
    }
}

/// Upstream plugin emitting a heartbeat event every `interval_secs`.
#[derive(Debug, Default)]
pub struct Heartbeat {
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<u64>>>,
}

impl Plugin for Heartbeat {
    fn capabilities(&self) -> Capabilities {
        Capabilities::UPSTREAM
    }

    async fn init(&mut self, config: &PluginConfig, ingress: IngressHandle) -> Result<(), PluginError> {
        let settings: HeartbeatSettings = config.settings()?;
        if !settings.interval_secs.is_finite() || settings.interval_secs <= 0.0 {
            return Err(PluginError::Init(format!(
                "interval_secs must be a positive number, got {}",
                settings.interval_secs
            )));
        }

        let interval = Duration::from_secs_f64(settings.interval_secs);
        let task = spawn_producer(
            config.name.clone(),
            settings.source,
            interval,
            Verbosity::from_config(config)?,
            ingress,
            self.cancel.clone(),
        );
        *self.task.get_mut() = Some(task);

        tracing::info!(
            plugin = %config.name,
            interval_secs = settings.interval_secs,
            "heartbeat started"
        );
        Ok(())
    }

    async fn halt(&self) -> Result<(), PluginError> {
        self.cancel.cancel();
        let task = self.task.lock().await.take();
        if let Some(task) = task {
            let sent = task
                .await
                .map_err(|e| PluginError::Halt(format!("heartbeat task failed: {e}")))?;
            tracing::info!(sent, "heartbeat stopped");
        }
        Ok(())
    }
}

fn spawn_producer(
    name: String,
    source: String,
    interval: Duration,
    verbosity: Verbosity,
    ingress: IngressHandle,
    cancel: CancellationToken,
) -> JoinHandle<u64> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // interval() fires immediately; the first heartbeat goes out one period after start
        ticker.tick().await;

        let mut sequence: u64 = 0;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let event = Event::new(EVENT_TYPE_HEARTBEAT, source.as_str())
                        .with_metadata(json!({ "plugin": name, "sequence": sequence }));
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        result = ingress.submit(event) => match result {
                            Ok(()) => {
                                if verbosity.allows(Level::TRACE) {
                                    tracing::trace!(plugin = %name, sequence, "heartbeat submitted");
                                }
                                sequence += 1;
                            }
                            Err(IngressError::Closed) => {
                                tracing::debug!(plugin = %name, "ingress closed, heartbeat exiting");
                                break;
                            }
                            Err(e) => {
                                tracing::warn!(plugin = %name, error = %e, "heartbeat not submitted");
                            }
                        },
                    }
                }
            }
        }
        sequence
    })
}
