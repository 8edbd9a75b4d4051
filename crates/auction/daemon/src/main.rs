//! Auction Daemon - sealed-bid round engine service
//!
//! The daemon provides:
//! - REST API for rounds, bids, tiebreakers and budgets
//! - Deadline poller that closes rounds and tiebreakers on time
//! - Event streaming for observers

use anyhow::Context;
use auction_daemon::{DaemonConfig, Server};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Auction Daemon CLI
#[derive(Parser)]
#[command(name = "auctiond")]
#[command(about = "Auction Daemon - sealed-bid rounds and tiebreakers", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "AUCTION_CONFIG")]
    config: Option<String>,

    /// Listen address, overrides the configured one
    #[arg(short, long, env = "AUCTION_LISTEN_ADDR")]
    listen: Option<String>,

    /// Log level, overrides the configured one
    #[arg(long, env = "AUCTION_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "AUCTION_LOG_JSON")]
    json: bool,

    /// Do not run the in-process deadline poller
    #[arg(long)]
    no_poller: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = DaemonConfig::load(cli.config.as_deref()).context("loading configuration")?;

    if let Some(listen) = &cli.listen {
        config.server.listen_addr = listen
            .parse()
            .with_context(|| format!("invalid listen address {}", listen))?;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    if cli.json {
        config.logging.json = true;
    }
    if cli.no_poller {
        config.scheduler.enabled = false;
    }

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.level.clone().into());

    if config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        listen = %config.server.listen_addr,
        poller = config.scheduler.enabled,
        "Starting auction daemon"
    );

    let server = Server::new(config).context("building server")?;
    server.run().await.context("running server")
}
