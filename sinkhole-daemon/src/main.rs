use anyhow::Result;
use clap::Parser;

use sinkhole_core::config::SinkholeConfig;
use sinkhole_daemon::cli::DaemonCli;
use sinkhole_daemon::logging;
use sinkhole_daemon::orchestrator::Orchestrator;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = DaemonCli::parse();

    // file -> env -> CLI, validated once all layers are applied
    let mut config = SinkholeConfig::from_file(&cli.config)
        .await
        .map_err(|e| anyhow::anyhow!("failed to load config {}: {}", cli.config.display(), e))?;
    config.apply_env_overrides();
    cli.apply_overrides(&mut config);
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

    if cli.validate {
        println!(
            "configuration {} is valid ({} plugin(s) enabled)",
            cli.config.display(),
            config.effective_plugins().len()
        );
        return Ok(());
    }

    logging::init_tracing(&config)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "sinkhole-daemon starting"
    );

    let mut orchestrator = Orchestrator::build_from_config(config).await?;
    let report = orchestrator.run().await?;

    tracing::info!(
        halted = report.halted.len(),
        failed = report.failed.len(),
        "sinkhole-daemon shut down"
    );
    Ok(())
}
