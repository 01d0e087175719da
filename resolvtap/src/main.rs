use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};
use resolvtap::{ResolvTap, settings::Settings, sink::LogTracker, telemetry};
use tokio::signal::unix::{SignalKind, signal};

#[derive(Debug, Parser)]
struct Opt {
    /// Verbose output
    #[clap(short, long)]
    verbose: bool,

    /// Configuration file (yaml, toml or json)
    #[clap(short, long, env = "RESOLVTAP_CONFIG")]
    config: Option<PathBuf>,

    /// Instrumentation artifact to load instead of the configured one
    #[clap(long)]
    artifact: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let opt = Opt::parse();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if opt.verbose { "debug" } else { "info" }),
    )
    .init();

    let mut settings =
        Settings::new(opt.config.as_deref()).context("Failed to load configuration")?;
    if let Some(artifact) = opt.artifact {
        settings.artifact_path = artifact;
    }
    info!("Settings: {:?}", settings);

    telemetry::init_metrics()?;

    let result = ResolvTap::new(settings, LogTracker)
        .run(shutdown_signal())
        .await;

    telemetry::shutdown_metrics();

    if let Err(e) = &result {
        error!("{}", e);
    }
    result.context("DNS lookup tap failed")
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to install SIGTERM handler: {}", e);
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
        _ = terminate.recv() => info!("Received SIGTERM"),
    }
    info!("Exiting...");
}
