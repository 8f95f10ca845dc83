//! `forward`: relays every delivered event to another sinkhole instance.
//!
//! ```toml
//! [[plugins]]
//! name = "to-central"
//! kind = "forward"
//!
//! [plugins.config]
//! dest_address = "http://10.0.0.5:8080"
//! timeout_seconds = 30
//! token = "..."
//! ```
//!
//! Events are POSTed in the gateway's wire format to
//! `{dest_address}/api/v1/event`. A `dest_address` that already ends with
//! that path is used as is.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Deserialize;
use tracing::Level;

use sinkhole_core::config::PluginConfig;
use sinkhole_core::error::PluginError;
use sinkhole_core::event::Event;
use sinkhole_core::ingress::IngressHandle;
use sinkhole_core::plugin::{Capabilities, Plugin};

use super::Verbosity;
use crate::gateway::EVENT_PATH;

#[derive(Debug, Deserialize)]
#[serde(default)]
struct ForwardSettings {
    dest_address: String,
    timeout_seconds: f64,
    token: Option<String>,
}

impl Default for ForwardSettings {
    fn default() -> Self {
        Self {
            dest_address: String::new(),
            timeout_seconds: 30.0,
            token: None,
        }
    }
}

/// Downstream plugin that POSTs events to a remote gateway.
#[derive(Debug, Default)]
pub struct Forward {
    name: String,
    endpoint: String,
    token: Option<String>,
    client: Option<reqwest::Client>,
    verbosity: Verbosity,
    forwarded: AtomicU64,
    failed: AtomicU64,
}

impl Forward {
    /// Number of events the remote accepted.
    pub fn forwarded(&self) -> u64 {
        self.forwarded.load(Ordering::Relaxed)
    }

    /// Number of events that could not be delivered.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Resolved URL events are sent to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn send(&self, event: &Event) -> Result<(), PluginError> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| PluginError::Inbox("forward plugin not initialized".to_owned()))?;

        let mut request = client.post(&self.endpoint).json(event);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| PluginError::Inbox(format!("POST {} failed: {e}", self.endpoint)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(PluginError::Inbox(format!(
                "POST {} returned {status}",
                self.endpoint
            )));
        }
        Ok(())
    }
}

fn event_endpoint(dest_address: &str) -> String {
    let base = dest_address.trim_end_matches('/');
    if base.ends_with(EVENT_PATH) {
        base.to_owned()
    } else {
        format!("{base}{EVENT_PATH}")
    }
}

impl Plugin for Forward {
    fn capabilities(&self) -> Capabilities {
        Capabilities::DOWNSTREAM
    }

    async fn init(&mut self, config: &PluginConfig, _ingress: IngressHandle) -> Result<(), PluginError> {
        let settings: ForwardSettings = config.settings()?;
        if settings.dest_address.trim().is_empty() {
            return Err(PluginError::Init("dest_address is required".to_owned()));
        }
        if !settings.timeout_seconds.is_finite() || settings.timeout_seconds <= 0.0 {
            return Err(PluginError::Init(format!(
                "timeout_seconds must be a positive number, got {}",
                settings.timeout_seconds
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs_f64(settings.timeout_seconds))
            .build()
            .map_err(|e| PluginError::Init(format!("failed to build http client: {e}")))?;

        self.name.clone_from(&config.name);
        self.endpoint = event_endpoint(&settings.dest_address);
        self.token = settings.token;
        self.client = Some(client);
        self.verbosity = Verbosity::from_config(config)?;

        tracing::info!(
            plugin = %self.name,
            endpoint = %self.endpoint,
            timeout_seconds = settings.timeout_seconds,
            "forward initialized"
        );
        Ok(())
    }

    async fn halt(&self) -> Result<(), PluginError> {
        tracing::info!(
            plugin = %self.name,
            forwarded = self.forwarded(),
            failed = self.failed(),
            "forward halted"
        );
        Ok(())
    }

    async fn inbox(&self, event: Arc<Event>) -> Result<(), PluginError> {
        match self.send(&event).await {
            Ok(()) => {
                self.forwarded.fetch_add(1, Ordering::Relaxed);
                if self.verbosity.allows(Level::DEBUG) {
                    tracing::debug!(plugin = %self.name, event = %event, "event forwarded");
                }
                Ok(())
            }
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_appends_event_path_once() {
        assert_eq!(
            event_endpoint("http://10.0.0.5:8080"),
            "http://10.0.0.5:8080/api/v1/event"
        );
        assert_eq!(
            event_endpoint("http://10.0.0.5:8080/"),
            "http://10.0.0.5:8080/api/v1/event"
        );
        assert_eq!(
            event_endpoint("http://central/api/v1/event"),
            "http://central/api/v1/event"
        );
    }
}
