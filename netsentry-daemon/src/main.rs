use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;

use netsentry_core::NetsentryConfig;
use netsentry_daemon::cli::DaemonCli;
use netsentry_daemon::logging;
use netsentry_daemon::orchestrator::Orchestrator;

#[tokio::main]
async fn main() -> ExitCode {
    match run(DaemonCli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // tracing may not be initialized yet
            eprintln!("netsentry-daemon: {e:#}");
            tracing::error!(error = %e, "netsentry-daemon exiting with error");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: DaemonCli) -> Result<()> {
    let config = NetsentryConfig::load_with_overrides(&cli.config, &cli.config_overrides())
        .await
        .map_err(|e| anyhow::anyhow!("failed to load config {}: {}", cli.config.display(), e))?;

    if cli.validate {
        println!("configuration OK: {}", cli.config.display());
        return Ok(());
    }

    logging::init_tracing(&config.general)?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "netsentry-daemon starting"
    );

    let mut orchestrator = Orchestrator::build_from_config(config).await?;
    orchestrator.run().await?;

    tracing::info!("netsentry-daemon shut down");
    Ok(())
}
