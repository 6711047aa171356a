use anyhow::{Context, Result};
use clap::Parser;
use procward::config::DaemonConfig;
use procward::daemon::Daemon;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// procward daemon - supervises the registered processes
#[derive(Parser)]
#[command(name = "procward-daemon")]
#[command(version, about, long_about = None)]
struct Args {
    /// Daemon config file (TOML); defaults apply when absent
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => DaemonConfig::from_file(path)
            .with_context(|| format!("failed to load daemon config {}", path.display()))?,
        None => DaemonConfig::default(),
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .context("invalid log level")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(
        state = %config.state_path.display(),
        socket = %config.socket_path.display(),
        "Starting procward daemon"
    );

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        signal_token.cancel();
    });

    Daemon::new(config)
        .run(shutdown)
        .await
        .context("daemon terminated with an error")
}

/// Resolve on SIGINT or SIGTERM
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            error!("Failed to install SIGTERM handler: {}", e);
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C: {}", e);
            }
            return;
        }
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to listen for Ctrl+C: {}", e);
            }
            info!("Received SIGINT");
        }
        _ = terminate.recv() => info!("Received SIGTERM"),
    }
}
