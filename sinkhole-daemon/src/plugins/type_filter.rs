//! `type_filter`: drops events by type.
//!
//! A non-empty `allow` list admits only the listed types. `deny` is
//! checked afterwards and always wins.

use std::collections::HashSet;
use std::sync::Arc;

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
struct TypeFilterSettings {
    allow: Vec<String>,
    deny: Vec<String>,
}

/// Middleware plugin filtering on `Event::event_type`.
#[derive(Debug, Default)]
pub struct TypeFilter {
    name: String,
    allow: HashSet<String>,
    deny: HashSet<String>,
    verbosity: Verbosity,
}

impl TypeFilter {
    /// Whether an event of this type passes the filter.
    pub fn admits(&self, event_type: &str) -> bool {
        if !self.allow.is_empty() && !self.allow.contains(event_type) {
            return false;
        }
        !self.deny.contains(event_type)
    }
}

impl Plugin for TypeFilter {
    fn capabilities(&self) -> Capabilities {
        Capabilities::MIDDLEWARE
    }

    async fn init(&mut self, config: &PluginConfig, _ingress: IngressHandle) -> Result<(), PluginError> {
        let settings: TypeFilterSettings = config.settings()?;
        self.name.clone_from(&config.name);
        self.allow = settings.allow.into_iter().collect();
        self.deny = settings.deny.into_iter().collect();
        self.verbosity = Verbosity::from_config(config)?;

        if self.allow.is_empty() && self.deny.is_empty() {
            tracing::warn!(plugin = %self.name, "type filter has no rules, every event passes");
        }
        Ok(())
    }

    async fn halt(&self) -> Result<(), PluginError> {
        Ok(())
    }

    async fn filter_event(&self, event: Arc<Event>) -> Result<Option<Arc<Event>>, PluginError> {
        if self.admits(&event.event_type) {
            return Ok(Some(event));
        }
        if self.verbosity.allows(Level::DEBUG) {
            tracing::debug!(
                plugin = %self.name,
                event_type = %event.event_type,
                source = %event.source,
                "event filtered by type"
            );
        }
        Ok(None)
    }
}
