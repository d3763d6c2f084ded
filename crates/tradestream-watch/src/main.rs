/*
[INPUT]:  CLI arguments, YAML configuration file, OS shutdown signals
[OUTPUT]: Running stream watchers with graceful shutdown
[POS]:    Binary entry point
[UPDATE]: When changing CLI flags, startup flow, or shutdown handling
*/

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tradestream_watch::{WatchConfig, WatchRunner};

#[derive(Parser, Debug)]
#[command(name = "tradestream-watch", version, about = "Watch real-time trading streams")]
struct Cli {
    #[arg(long = "config", value_name = "PATH")]
    config_path: PathBuf,
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info")]
    log_level: String,
    #[arg(long = "dry-run")]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(&args.log_level)?;

    info!(
        config_path = %args.config_path.display(),
        dry_run = args.dry_run,
        "starting tradestream-watch"
    );

    let config = WatchConfig::from_file(&args.config_path).context("load config")?;
    info!(stream_count = config.streams.len(), "configuration loaded");

    if args.dry_run {
        for stream in &config.streams {
            let url = stream
                .stream
                .endpoint
                .url(None)
                .with_context(|| format!("stream {} endpoint", stream.id))?;
            info!(stream = %stream.id, %url, channels = ?stream.channels, "stream configured");
        }
        info!("dry-run requested; configuration validated");
        return Ok(());
    }

    let runner = WatchRunner::start(config).context("start streams")?;
    let shutdown = runner.shutdown_token();
    setup_signal_handlers(shutdown.clone());
    info!("streams started");

    runner.run().await;
    info!("shutdown signal received");

    runner.shutdown_and_wait().await;
    info!("shutdown complete");

    Ok(())
}

fn init_tracing(log_level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(log_level).context("invalid log level")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|err| anyhow!(err))
        .context("initialize tracing subscriber")?;
    Ok(())
}

fn setup_signal_handlers(shutdown: CancellationToken) {
    let shutdown_clone = shutdown.clone();
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to install SIGINT handler");
            return;
        }
        info!("received SIGINT");
        shutdown_clone.cancel();
    });

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let shutdown_clone = shutdown.clone();
        tokio::spawn(async move {
            match signal(SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                    info!("received SIGTERM");
                    shutdown_clone.cancel();
                }
                Err(err) => {
                    warn!(error = %err, "failed to install SIGTERM handler");
                }
            }
        });
    }
}
