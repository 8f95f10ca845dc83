//! `tagger`: attaches per-source tags and metadata to events.
//!
//! ```toml
//! [[plugins]]
//! name = "tagger"
//! kind = "tagger"
//!
//! [plugins.config.default]
//! tags = ["sinkhole"]
//!
//! [plugins.config.sources.smtpd]
//! tags = ["mail", "honeypot"]
//! metadata = { sensor = "mx-01" }
//! ```
//!
//! Tags are appended to the `tags` array of the event metadata without
//! duplicates. Configured metadata keys never overwrite keys the event
//! already carries. Non-object metadata is kept under `"data"`.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value};

use sinkhole_core::config::PluginConfig;
use sinkhole_core::error::PluginError;
use sinkhole_core::event::Event;
use sinkhole_core::ingress::IngressHandle;
use sinkhole_core::plugin::{Capabilities, Plugin};

const TAGS_KEY: &str = "tags";
const WRAPPED_KEY: &str = "data";

/// Tags and metadata applied to one source.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct SourceTags {
    pub tags: Vec<String>,
    pub metadata: Map<String, Value>,
}

impl SourceTags {
    fn is_empty(&self) -> bool {
        self.tags.is_empty() && self.metadata.is_empty()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TaggerSettings {
    default: Option<SourceTags>,
    sources: BTreeMap<String, SourceTags>,
}

/// Middleware plugin enriching event metadata by source.
#[derive(Debug, Default)]
pub struct Tagger {
    name: String,
    default: Option<SourceTags>,
    sources: BTreeMap<String, SourceTags>,
}

impl Tagger {
    fn rules_for(&self, source: &str) -> impl Iterator<Item = &SourceTags> {
        self.sources
            .get(source)
            .into_iter()
            .chain(self.default.as_ref())
            .filter(|rule| !rule.is_empty())
    }

    /// Return the metadata the event would carry after tagging, or `None`
    /// when no rule applies.
    pub fn tagged_metadata(&self, event: &Event) -> Option<Value> {
        let mut rules = self.rules_for(&event.source).peekable();
        rules.peek()?;

        let mut object = match event.metadata() {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert(WRAPPED_KEY.to_owned(), other.clone());
                map
            }
        };

        for rule in rules {
            merge_tags(&mut object, &rule.tags);
            for (key, value) in &rule.metadata {
                object.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }
        Some(Value::Object(object))
    }
}

fn merge_tags(object: &mut Map<String, Value>, tags: &[String]) {
    if tags.is_empty() {
        return;
    }
    let entry = object
        .entry(TAGS_KEY.to_owned())
        .or_insert_with(|| Value::Array(Vec::new()));
    if !entry.is_array() {
        let previous = entry.take();
        *entry = Value::Array(vec![previous]);
    }
    if let Value::Array(existing) = entry {
        for tag in tags {
            let tag = Value::String(tag.clone());
            if !existing.contains(&tag) {
                existing.push(tag);
            }
        }
    }
}

impl Plugin for Tagger {
    fn capabilities(&self) -> Capabilities {
        Capabilities::MIDDLEWARE
    }

    async fn init(&mut self, config: &PluginConfig, _ingress: IngressHandle) -> Result<(), PluginError> {
        let settings: TaggerSettings = config.settings()?;
        self.name.clone_from(&config.name);
        self.default = settings.default;
        self.sources = settings.sources;
        tracing::debug!(
            plugin = %self.name,
            sources = self.sources.len(),
            has_default = self.default.is_some(),
            "tagger initialized"
        );
        Ok(())
    }

    async fn halt(&self) -> Result<(), PluginError> {
        Ok(())
    }

    async fn filter_event(&self, event: Arc<Event>) -> Result<Option<Arc<Event>>, PluginError> {
        match self.tagged_metadata(&event) {
            Some(metadata) => {
                let tagged = Event::clone(&event).with_metadata(metadata);
                Ok(Some(Arc::new(tagged)))
            }
            None => Ok(Some(event)),
        }
    }
}
