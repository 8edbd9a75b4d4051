//! Deadline poller
//!
//! The engine holds no timers. This loop plays the external scheduler:
//! every tick it runs one deadline sweep through the same idempotent
//! entry points an admin would call.

use crate::config::SchedulerConfig;
use auction_engine::{AuctionEngine, EngineResult, PollReport};
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tokio::time::{interval, Duration, MissedTickBehavior};

/// Periodic driver for `AuctionEngine::poll_deadlines`
pub struct DeadlinePoller {
    config: SchedulerConfig,
    engine: Arc<AuctionEngine>,
    shutdown_tx: watch::Sender<bool>,
    last_report: RwLock<Option<PollReport>>,
}

impl DeadlinePoller {
    pub fn new(config: SchedulerConfig, engine: Arc<AuctionEngine>) -> Arc<Self> {
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(Self {
            config,
            engine,
            shutdown_tx,
            last_report: RwLock::new(None),
        })
    }

    /// Run sweeps until `stop` is called.
    pub async fn start(self: Arc<Self>) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut ticker = interval(Duration::from_secs(self.config.poll_interval_secs.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            interval_secs = self.config.poll_interval_secs,
            "Deadline poller started"
        );

        loop {
            if *shutdown_rx.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep().await {
                        tracing::error!(error = %e, "Deadline sweep failed");
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Deadline poller stopped");
    }

    /// One sweep at the engine's current time.
    pub async fn sweep(&self) -> EngineResult<PollReport> {
        let report = self.engine.poll_deadlines(self.engine.now()).await?;
        *self.last_report.write().await = Some(report.clone());
        Ok(report)
    }

    pub async fn last_report(&self) -> Option<PollReport> {
        self.last_report.read().await.clone()
    }

    pub fn stop(&self) {
        self.shutdown_tx.send_replace(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use auction_engine::{EngineConfig, ManualClock};
    use chrono::Utc;

    #[tokio::test]
    async fn test_sweep_records_last_report() {
        let engine = Arc::new(AuctionEngine::in_memory(
            EngineConfig::default(),
            "poller",
            1_000,
            Arc::new(ManualClock::new(Utc::now())),
        ));
        let poller = DeadlinePoller::new(SchedulerConfig::default(), engine);
        assert!(poller.last_report().await.is_none());

        let report = poller.sweep().await.unwrap();
        assert!(report.is_idle());
        assert!(poller.last_report().await.is_some());
    }

    #[tokio::test]
    async fn test_stop_ends_loop() {
        let engine = Arc::new(AuctionEngine::in_memory(
            EngineConfig::default(),
            "poller",
            1_000,
            Arc::new(ManualClock::new(Utc::now())),
        ));
        let poller = DeadlinePoller::new(SchedulerConfig::default(), engine);
        let handle = tokio::spawn(poller.clone().start());
        tokio::task::yield_now().await;
        poller.stop();
        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
