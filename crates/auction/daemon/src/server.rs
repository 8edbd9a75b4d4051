//! Server setup and lifecycle management

use crate::api::create_router;
use crate::api::rest::state::AppState;
use crate::config::DaemonConfig;
use crate::error::{DaemonError, DaemonResult};
use crate::scheduler::DeadlinePoller;
use auction_engine::{AuctionEngine, Sealer, StaticBalanceSource, SystemClock};
use auction_storage::InMemoryAuctionStorage;
use auction_types::BidderId;
use rand::{distributions::Alphanumeric, Rng};
use std::sync::Arc;
use tokio::net::TcpListener;

/// Auction daemon server
pub struct Server {
    config: DaemonConfig,
    engine: Arc<AuctionEngine>,
    poller: Arc<DeadlinePoller>,
}

impl Server {
    pub fn new(config: DaemonConfig) -> DaemonResult<Self> {
        let engine = Arc::new(build_engine(&config));
        let poller = DeadlinePoller::new(config.scheduler.clone(), engine.clone());
        Ok(Self {
            config,
            engine,
            poller,
        })
    }

    pub async fn run(self) -> DaemonResult<()> {
        let addr = self.config.server.listen_addr;
        let state = AppState::new(self.engine.clone(), self.poller.clone());
        let app = create_router(state, self.config.server.enable_cors);

        let listener = TcpListener::bind(addr).await?;
        tracing::info!(%addr, "Auction daemon listening");

        let poller_handle = if self.config.scheduler.enabled {
            Some(tokio::spawn(self.poller.clone().start()))
        } else {
            tracing::info!("Deadline poller disabled; expecting an external scheduler");
            None
        };

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| DaemonError::Server(e.to_string()))?;

        tracing::info!("Auction daemon shutting down");

        self.poller.stop();
        if let Some(handle) = poller_handle {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Deadline poller task ended abnormally");
            }
        }

        Ok(())
    }
}

/// Engine over the in-memory backend with configured opening balances.
pub fn build_engine(config: &DaemonConfig) -> AuctionEngine {
    let balances = config.balances.bidders.iter().fold(
        StaticBalanceSource::new(config.balances.default_balance),
        |source, (bidder, balance)| source.with_balance(BidderId::new(bidder.as_str()), *balance),
    );

    let passphrase = match &config.sealing.passphrase {
        Some(passphrase) => passphrase.clone(),
        None => {
            tracing::warn!("No sealing passphrase configured; generated a random one for this process");
            rand::thread_rng()
                .sample_iter(&Alphanumeric)
                .take(48)
                .map(char::from)
                .collect()
        }
    };

    AuctionEngine::new(
        Arc::new(InMemoryAuctionStorage::new()),
        Arc::new(balances),
        Arc::new(SystemClock),
        Sealer::from_passphrase(&passphrase),
        config.engine.clone(),
    )
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
