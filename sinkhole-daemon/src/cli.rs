//! CLI argument definitions for sinkhole-daemon.
//!
//! Uses `clap` v4 derive macros to parse command-line arguments.

use std::path::PathBuf;

use clap::Parser;

use sinkhole_core::config::SinkholeConfig;

/// Sinkhole event router daemon.
///
/// Loads the configured plugins, routes events from upstream plugins and
/// the HTTP gateway through the middleware chain, and fans them out to
/// every downstream plugin.
#[derive(Parser, Debug)]
#[command(name = "sinkhole-daemon")]
#[command(version, about, long_about = None)]
pub struct DaemonCli {
    /// Path to sinkhole.toml configuration file.
    #[arg(short, long, default_value = "/etc/sinkhole/sinkhole.toml")]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override log format (json, pretty).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_format: Option<String>,

    /// Validate configuration file and exit without starting the daemon.
    #[arg(long)]
    pub validate: bool,

    /// Override PID file path (takes precedence over config file).
    #[arg(long)]
    pub pid_file: Option<String>,

    /// Override the HTTP gateway listen address, e.g. `0.0.0.0:8080`.
    #[arg(long)]
    pub listen: Option<String>,
}

impl DaemonCli {
    /// Apply command-line overrides on top of an already-loaded config.
    ///
    /// The config is not re-validated here; callers validate afterwards.
    pub fn apply_overrides(&self, config: &mut SinkholeConfig) {
        if let Some(level) = &self.log_level {
            config.general.log_level.clone_from(level);
        }
        if let Some(format) = &self.log_format {
            config.general.log_format.clone_from(format);
        }
        if let Some(pid_file) = &self.pid_file {
            config.general.pid_file.clone_from(pid_file);
        }
        if let Some(listen) = &self.listen {
            config.api.listen_addr.clone_from(listen);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_system_config() {
        let cli = DaemonCli::parse_from(["sinkhole-daemon"]);
        assert_eq!(cli.config, PathBuf::from("/etc/sinkhole/sinkhole.toml"));
        assert!(!cli.validate);
        assert!(cli.listen.is_none());
    }

    #[test]
    fn overrides_take_precedence_over_config() {
        // Given: CLI flags for every overridable field
        let cli = DaemonCli::parse_from([
            "sinkhole-daemon",
            "--config",
            "/tmp/s.toml",
            "--log-level",
            "debug",
            "--log-format",
            "pretty",
            "--pid-file",
            "",
            "--listen",
            "0.0.0.0:9999",
        ]);
        let mut config = SinkholeConfig::default();

        // When
        cli.apply_overrides(&mut config);

        // Then
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.general.log_format, "pretty");
        assert!(config.general.pid_file.is_empty());
        assert_eq!(config.api.listen_addr, "0.0.0.0:9999");
    }

    #[test]
    fn absent_flags_leave_config_untouched() {
        let cli = DaemonCli::parse_from(["sinkhole-daemon", "--validate"]);
        let mut config = SinkholeConfig::default();
        let before = config.clone();

        cli.apply_overrides(&mut config);

        assert!(cli.validate);
        assert_eq!(config.general.log_level, before.general.log_level);
        assert_eq!(config.api.listen_addr, before.api.listen_addr);
    }
}
