//! Tracing setup for the daemon.
//!
//! The global filter starts at `[general] log_level`. A plugin may ask for
//! more through its own `log_level` key; the filter then opens the plugin
//! modules up to the most verbose such level and each instance's
//! [`Verbosity`](crate::plugins::Verbosity) narrows it back down.
//! `RUST_LOG`, when set, replaces the computed filter.

use std::str::FromStr;

use anyhow::Result;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use sinkhole_core::config::SinkholeConfig;

/// Target prefix of every built-in plugin's log records.
pub const PLUGIN_TARGET: &str = concat!(env!("CARGO_CRATE_NAME"), "::plugins");

/// Output format of `[general] log_format`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per line.
    Json,
    /// Multi-line human-readable output.
    Pretty,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            other => Err(anyhow::anyhow!(
                "unknown log format '{}', expected 'json' or 'pretty'",
                other
            )),
        }
    }
}

/// Filter directives for `config`: the global level, plus a plugin
/// directive when some enabled plugin wants more detail than that.
pub fn filter_directives(config: &SinkholeConfig) -> String {
    let global = config.general.log_level.as_str();
    let global_filter = global.parse::<LevelFilter>().unwrap_or(LevelFilter::INFO);

    let loudest = config
        .effective_plugins()
        .iter()
        .filter_map(|plugin| {
            let level = plugin.log_level()?.to_owned();
            let filter = plugin.max_log_level().ok()?;
            Some((filter, level))
        })
        .max_by_key(|(filter, _)| *filter);

    match loudest {
        Some((filter, level)) if filter > global_filter => {
            format!("{global},{PLUGIN_TARGET}={level}")
        }
        _ => global.to_owned(),
    }
}

/// Install the global tracing subscriber.
///
/// Must be called once, before any tracing macros are used.
///
/// # Errors
///
/// - `log_format` is not `json` or `pretty`
/// - The directives do not parse
/// - A global subscriber is already installed
pub fn init_tracing(config: &SinkholeConfig) -> Result<()> {
    let format: LogFormat = config.general.log_format.parse()?;
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(filter_directives(config))
            .map_err(|e| anyhow::anyhow!("invalid log filter: {}", e))?,
    };

    let registry = tracing_subscriber::registry().with(filter);
    let installed = match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).try_init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer().pretty()).try_init(),
    };
    installed.map_err(|e| anyhow::anyhow!("failed to initialize tracing subscriber: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sinkhole_core::config::PluginConfig;

    fn config_with(global: &str, plugins: &[(&str, Option<&str>)]) -> SinkholeConfig {
        let mut config = SinkholeConfig::default();
        config.general.log_level = global.to_owned();
        for (name, level) in plugins {
            let mut plugin = PluginConfig::new(*name, "log_sink");
            if let Some(level) = level {
                plugin = plugin.with_setting("log_level", *level);
            }
            config.plugins.push(plugin);
        }
        config
    }

    #[test]
    fn plugin_target_is_the_plugins_module() {
        assert_eq!(PLUGIN_TARGET, "sinkhole_daemon::plugins");
    }

    #[test]
    fn global_level_alone_when_no_plugin_is_louder() {
        let config = config_with("info", &[("a", None), ("b", Some("warn"))]);
        assert_eq!(filter_directives(&config), "info");
    }

    #[test]
    fn loudest_plugin_level_opens_plugin_target() {
        let config = config_with("warn", &[("a", Some("debug")), ("b", Some("trace")), ("c", None)]);
        assert_eq!(
            filter_directives(&config),
            "warn,sinkhole_daemon::plugins=trace"
        );
    }

    #[test]
    fn disabled_plugins_do_not_widen_the_filter() {
        let mut config = config_with("info", &[("a", Some("debug"))]);
        config.plugins[0].enabled = false;
        assert_eq!(filter_directives(&config), "info");
    }

    #[test]
    fn unknown_format_is_rejected_before_installing() {
        let mut config = SinkholeConfig::default();
        config.general.log_format = "xml".to_owned();

        let err = init_tracing(&config).expect_err("xml is not a supported format");

        assert!(err.to_string().contains("unknown log format 'xml'"));
    }
}
