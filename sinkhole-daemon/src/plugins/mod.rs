//! Built-in plugin catalog.
//!
//! Plugins are statically linked and selected by the `kind` field of each
//! `[[plugins]]` entry. Constructors only allocate; settings are parsed in
//! `init` so a bad table surfaces as an init failure for that plugin alone.
//!
//! | kind | capabilities |
//! |---|---|
//! | `log_sink` | downstream |
//! | `type_filter` | middleware |
//! | `tagger` | middleware |
//! | `heartbeat` | upstream |
//! | `forward` | downstream |
//!
//! Plugins with per-event log records read the injected `log_level` key into
//! a [`Verbosity`] and skip records that level does not allow.

pub mod forward;
pub mod heartbeat;
pub mod log_sink;
pub mod tagger;
pub mod type_filter;

use tracing::Level;
use tracing::level_filters::LevelFilter;

use sinkhole_core::config::PluginConfig;
use sinkhole_core::error::PluginError;
use sinkhole_core::plugin::{DynPlugin, Plugin};
use sinkhole_core::registry::PluginCatalog;

pub use forward::Forward;
pub use heartbeat::Heartbeat;
pub use log_sink::LogSink;
pub use tagger::Tagger;
pub use type_filter::TypeFilter;

/// Catalog key of [`LogSink`].
pub const KIND_LOG_SINK: &str = "log_sink";
/// Catalog key of [`TypeFilter`].
pub const KIND_TYPE_FILTER: &str = "type_filter";
/// Catalog key of [`Tagger`].
pub const KIND_TAGGER: &str = "tagger";
/// Catalog key of [`Heartbeat`].
pub const KIND_HEARTBEAT: &str = "heartbeat";
/// Catalog key of [`Forward`].
pub const KIND_FORWARD: &str = "forward";

/// Most verbose level one plugin instance logs at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verbosity(LevelFilter);

impl Default for Verbosity {
    fn default() -> Self {
        Self(LevelFilter::INFO)
    }
}

impl Verbosity {
    /// Read the `log_level` key of a plugin's config.
    pub fn from_config(config: &PluginConfig) -> Result<Self, PluginError> {
        config.max_log_level().map(Self)
    }

    /// Whether a record at `level` should be written.
    pub fn allows(self, level: Level) -> bool {
        level <= self.0
    }
}

/// Build the catalog of every plugin shipped with the daemon.
pub fn builtin_catalog() -> PluginCatalog {
    PluginCatalog::new()
        .with(KIND_LOG_SINK, |_| boxed(LogSink::default()))
        .with(KIND_TYPE_FILTER, |_| boxed(TypeFilter::default()))
        .with(KIND_TAGGER, |_| boxed(Tagger::default()))
        .with(KIND_HEARTBEAT, |_| boxed(Heartbeat::default()))
        .with(KIND_FORWARD, |_| boxed(Forward::default()))
}

fn boxed<P: Plugin>(plugin: P) -> Result<Box<dyn DynPlugin>, PluginError> {
    Ok(Box::new(plugin))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_contains_every_builtin_kind() {
        let catalog = builtin_catalog();
        assert_eq!(
            catalog.kinds(),
            vec![KIND_FORWARD, KIND_HEARTBEAT, KIND_LOG_SINK, KIND_TAGGER, KIND_TYPE_FILTER]
        );
    }

    #[test]
    fn resolved_plugins_declare_expected_capabilities() {
        let catalog = builtin_catalog();
        let caps = |kind: &str| {
            catalog
                .resolve(&PluginConfig::new("p", kind))
                .expect("builtin kind resolves")
                .capabilities()
        };

        assert!(caps(KIND_LOG_SINK).is_downstream());
        assert!(caps(KIND_TYPE_FILTER).is_middleware());
        assert!(caps(KIND_TAGGER).is_middleware());
        assert!(caps(KIND_HEARTBEAT).is_upstream());
        assert!(caps(KIND_FORWARD).is_downstream());
    }

    #[test]
    fn verbosity_follows_injected_log_level() {
        let warn = Verbosity::from_config(
            &PluginConfig::new("p", KIND_LOG_SINK).with_setting("log_level", "warn"),
        )
        .unwrap();
        assert!(warn.allows(Level::ERROR));
        assert!(warn.allows(Level::WARN));
        assert!(!warn.allows(Level::INFO));

        let default = Verbosity::from_config(&PluginConfig::new("p", KIND_LOG_SINK)).unwrap();
        assert_eq!(default, Verbosity::default());
        assert!(default.allows(Level::INFO));
        assert!(!default.allows(Level::DEBUG));
    }

    #[test]
    fn unknown_kind_is_a_load_error() {
        let result = builtin_catalog().resolve(&PluginConfig::new("x", "smtpd"));
        assert!(result.is_err());
    }
}
