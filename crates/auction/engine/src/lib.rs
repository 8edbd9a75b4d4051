//! Auction Engine - sealed-bid rounds, allocation and tiebreakers
//!
//! The engine is a set of cooperating components over one storage seam:
//!
//! - [`BidLedger`]: sealed bids, revision, reveal
//! - [`BudgetLedger`]: balances, phase reserves, item caps
//! - [`AllocationResolver`]: winners, ties, exactly-once allocation
//! - [`TiebreakerDesk`]: fixed-window and continuous sub-auctions
//! - [`RoundController`]: the round state machine and reconcile
//!
//! [`AuctionEngine`] wires them together and adds the deadline sweep that
//! an external poller drives. The engine holds no timers of its own.
//!
//! Every mutating call returns an [`Outcome`]: expected rejections are
//! values, and only infrastructure faults or broken invariants surface as
//! [`EngineError`].

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod bids;
pub mod budget;
pub mod clock;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod notify;
pub mod resolver;
pub mod sealing;
pub mod tiebreaker;

pub use bids::{BidLedger, BidRequest};
pub use budget::{BalanceSource, BudgetLedger, ReserveDecision, StaticBalanceSource};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use error::{EngineError, EngineResult};
pub use lifecycle::{Finalization, ReconcileReport, Reconciliation, RoundController, RoundDetail};
pub use notify::Notifier;
pub use resolver::{rank_offers, AllocationResolver, Disqualification, ItemPlan, Offer, ResolutionReport};
pub use sealing::{Sealer, SealingError};
pub use tiebreaker::{ContinuousBook, Tiebreak, TiebreakView, TiebreakerDesk};

use auction_storage::{AuctionStorage, AuditRecord, InMemoryAuctionStorage, QueryWindow};
use auction_types::{
    Actor, Amount, AuctionEventEnvelope, BidId, BidView, BidderAccount, BidderId,
    FinalizationMode, NewRound, Outcome, PhasePolicy, ResolveMode, Round, RoundId, RoundStatus,
    SeriesId, Tiebreaker, TiebreakerId, TiebreakerStatus,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

/// What an `extend` call targets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "target", rename_all = "snake_case")]
pub enum ExtendTarget {
    Round { round_id: RoundId },
    Tiebreaker { tiebreaker_id: TiebreakerId },
}

/// State after an extension
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "target", rename_all = "snake_case")]
pub enum Extended {
    Round(Round),
    Tiebreaker(Tiebreaker),
}

/// Work done by one deadline sweep
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PollReport {
    pub closed: Vec<RoundId>,
    pub finalized: Vec<RoundId>,
    pub tiebreakers_resolved: Vec<TiebreakerId>,
    pub completed: Vec<RoundId>,
    pub failures: usize,
}

impl PollReport {
    pub fn is_idle(&self) -> bool {
        self.closed.is_empty()
            && self.finalized.is_empty()
            && self.tiebreakers_resolved.is_empty()
            && self.completed.is_empty()
            && self.failures == 0
    }
}

/// The assembled engine
pub struct AuctionEngine {
    storage: Arc<dyn AuctionStorage>,
    clock: Arc<dyn Clock>,
    notifier: Notifier,
    budget: Arc<BudgetLedger>,
    bids: Arc<BidLedger>,
    tiebreakers: TiebreakerDesk,
    rounds: RoundController,
}

impl AuctionEngine {
    pub fn new(
        storage: Arc<dyn AuctionStorage>,
        balances: Arc<dyn BalanceSource>,
        clock: Arc<dyn Clock>,
        sealer: Sealer,
        config: EngineConfig,
    ) -> Self {
        let notifier = Notifier::new(storage.clone(), config.event_channel_capacity);
        let budget = Arc::new(BudgetLedger::new(
            storage.clone(),
            balances,
            clock.clone(),
        ));
        let bids = Arc::new(BidLedger::new(
            storage.clone(),
            Arc::new(sealer),
            clock.clone(),
            config.clone(),
            notifier.clone(),
        ));
        let resolver = Arc::new(AllocationResolver::new(
            storage.clone(),
            budget.clone(),
            notifier.clone(),
            clock.clone(),
            config,
        ));
        let tiebreakers = TiebreakerDesk::new(
            storage.clone(),
            budget.clone(),
            resolver.clone(),
            notifier.clone(),
            clock.clone(),
        );
        let rounds = RoundController::new(
            storage.clone(),
            bids.clone(),
            resolver,
            notifier.clone(),
            clock.clone(),
        );

        Self {
            storage,
            clock,
            notifier,
            budget,
            bids,
            tiebreakers,
            rounds,
        }
    }

    /// Engine over the in-memory backend with one opening balance for all.
    pub fn in_memory(
        config: EngineConfig,
        passphrase: &str,
        default_balance: Amount,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::new(
            Arc::new(InMemoryAuctionStorage::new()),
            Arc::new(StaticBalanceSource::new(default_balance)),
            clock,
            Sealer::from_passphrase(passphrase),
            config,
        )
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuctionEventEnvelope> {
        self.notifier.subscribe()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // ═══════════════════════════════════════════════════════════════════
    // ROUNDS
    // ═══════════════════════════════════════════════════════════════════

    pub async fn create_round(&self, actor: &Actor, request: NewRound) -> EngineResult<Outcome<Round>> {
        self.rounds.create_round(actor, request).await
    }

    pub async fn close_round(&self, actor: &Actor, round_id: &RoundId) -> EngineResult<Outcome<Round>> {
        self.rounds.close_round(actor, round_id).await
    }

    pub async fn finalize_round(
        &self,
        actor: &Actor,
        round_id: &RoundId,
    ) -> EngineResult<Outcome<Finalization>> {
        self.rounds.finalize_round(actor, round_id).await
    }

    pub async fn preview(
        &self,
        actor: &Actor,
        round_id: &RoundId,
    ) -> EngineResult<Outcome<ResolutionReport>> {
        self.rounds.preview(actor, round_id).await
    }

    pub async fn cancel_round(&self, actor: &Actor, round_id: &RoundId) -> EngineResult<Outcome<Round>> {
        self.rounds.cancel_round(actor, round_id).await
    }

    pub async fn reconcile(
        &self,
        actor: &Actor,
        round_id: &RoundId,
    ) -> EngineResult<Outcome<Reconciliation>> {
        self.rounds.reconcile(actor, round_id).await
    }

    pub async fn round_detail(&self, round_id: &RoundId) -> EngineResult<Option<RoundDetail>> {
        self.rounds.round_detail(round_id).await
    }

    pub async fn extend(
        &self,
        actor: &Actor,
        target: ExtendTarget,
        minutes: u32,
    ) -> EngineResult<Outcome<Extended>> {
        Ok(match target {
            ExtendTarget::Round { round_id } => self
                .rounds
                .extend_round(actor, &round_id, minutes)
                .await?
                .map(Extended::Round),
            ExtendTarget::Tiebreaker { tiebreaker_id } => self
                .tiebreakers
                .extend(actor, &tiebreaker_id, minutes)
                .await?
                .map(Extended::Tiebreaker),
        })
    }

    // ═══════════════════════════════════════════════════════════════════
    // BIDS
    // ═══════════════════════════════════════════════════════════════════

    pub async fn submit_bid(&self, actor: &Actor, request: BidRequest) -> EngineResult<Outcome<BidView>> {
        self.bids.submit(actor, request).await
    }

    pub async fn revise_bid(
        &self,
        actor: &Actor,
        bid_id: BidId,
        request: BidRequest,
    ) -> EngineResult<Outcome<BidView>> {
        self.bids.revise(actor, bid_id, request).await
    }

    pub async fn withdraw_bid(
        &self,
        actor: &Actor,
        round_id: &RoundId,
        bidder_id: &BidderId,
        bid_id: &BidId,
    ) -> EngineResult<Outcome<BidView>> {
        self.bids.withdraw(actor, round_id, bidder_id, bid_id).await
    }

    pub async fn bids_for_bidder(
        &self,
        round_id: &RoundId,
        bidder_id: &BidderId,
    ) -> EngineResult<Vec<BidView>> {
        self.bids.bids_for_bidder(round_id, bidder_id).await
    }

    // ═══════════════════════════════════════════════════════════════════
    // TIEBREAKERS
    // ═══════════════════════════════════════════════════════════════════

    pub async fn tiebreaker_detail(&self, id: &TiebreakerId) -> EngineResult<Option<Tiebreaker>> {
        self.tiebreakers.detail(id).await
    }

    pub async fn round_tiebreakers(&self, round_id: &RoundId) -> EngineResult<Vec<Tiebreaker>> {
        self.tiebreakers.list_for_round(round_id).await
    }

    pub async fn submit_revision(
        &self,
        actor: &Actor,
        id: &TiebreakerId,
        bidder_id: &BidderId,
        amount: Amount,
    ) -> EngineResult<Outcome<Tiebreaker>> {
        let outcome = self
            .tiebreakers
            .submit_revision(actor, id, bidder_id, amount)
            .await?;
        self.after_tiebreaker(&outcome).await?;
        Ok(outcome)
    }

    pub async fn raise(
        &self,
        actor: &Actor,
        id: &TiebreakerId,
        bidder_id: &BidderId,
        amount: Amount,
    ) -> EngineResult<Outcome<Tiebreaker>> {
        self.tiebreakers.raise(actor, id, bidder_id, amount).await
    }

    pub async fn withdraw_from_tiebreaker(
        &self,
        actor: &Actor,
        id: &TiebreakerId,
        bidder_id: &BidderId,
    ) -> EngineResult<Outcome<Tiebreaker>> {
        let outcome = self.tiebreakers.withdraw(actor, id, bidder_id).await?;
        self.after_tiebreaker(&outcome).await?;
        Ok(outcome)
    }

    pub async fn resolve_tiebreaker(
        &self,
        actor: &Actor,
        id: &TiebreakerId,
        mode: ResolveMode,
    ) -> EngineResult<Outcome<Tiebreaker>> {
        let outcome = self.tiebreakers.resolve(actor, id, mode).await?;
        self.after_tiebreaker(&outcome).await?;
        Ok(outcome)
    }

    pub async fn close_tiebreaker(
        &self,
        actor: &Actor,
        id: &TiebreakerId,
    ) -> EngineResult<Outcome<Tiebreaker>> {
        let outcome = self.tiebreakers.close(actor, id).await?;
        self.after_tiebreaker(&outcome).await?;
        Ok(outcome)
    }

    /// A tiebreaker that just resolved may have been the round's last
    /// open item.
    async fn after_tiebreaker(&self, outcome: &Outcome<Tiebreaker>) -> EngineResult<()> {
        let Some(tb) = outcome.state.as_ref() else {
            return Ok(());
        };
        if outcome.is_accepted() && tb.status() == TiebreakerStatus::Resolved {
            self.rounds
                .reconcile(&Actor::scheduler(), tb.round_id())
                .await?;
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════
    // BUDGET
    // ═══════════════════════════════════════════════════════════════════

    pub async fn register_policy(
        &self,
        actor: &Actor,
        policy: PhasePolicy,
    ) -> EngineResult<Outcome<PhasePolicy>> {
        self.budget.register_policy(actor, policy).await
    }

    pub async fn policy(&self, series_id: &SeriesId) -> EngineResult<PhasePolicy> {
        self.budget.policy(series_id).await
    }

    pub async fn set_balance(
        &self,
        actor: &Actor,
        bidder_id: &BidderId,
        balance: Amount,
    ) -> EngineResult<Outcome<BidderAccount>> {
        self.budget.set_balance(actor, bidder_id, balance).await
    }

    pub async fn account(&self, bidder_id: &BidderId) -> EngineResult<BidderAccount> {
        self.budget.peek_account(bidder_id).await
    }

    pub async fn reserve_check(
        &self,
        bidder_id: &BidderId,
        series_id: &SeriesId,
        round_number: u32,
        prospective_spend: Amount,
    ) -> EngineResult<bool> {
        self.budget
            .reserve_check(bidder_id, series_id, round_number, prospective_spend)
            .await
    }

    pub async fn audit_log(&self, window: QueryWindow) -> EngineResult<Vec<AuditRecord>> {
        Ok(self.storage.list_audit(window).await?)
    }

    // ═══════════════════════════════════════════════════════════════════
    // DEADLINES
    // ═══════════════════════════════════════════════════════════════════

    /// One pass over every time-driven transition. Each step goes through
    /// the same entry points an operator would use; a failing step is
    /// logged and counted and the sweep carries on.
    pub async fn poll_deadlines(&self, now: DateTime<Utc>) -> EngineResult<PollReport> {
        let actor = Actor::scheduler();
        let mut report = PollReport::default();

        for round in self.storage.list_rounds(&[RoundStatus::Active]).await? {
            if now < round.closes_at {
                continue;
            }
            match self.rounds.close_round(&actor, &round.id).await {
                Ok(outcome) if outcome.is_accepted() => report.closed.push(round.id),
                Ok(_) => {}
                Err(err) => {
                    error!(round_id = %round.id, error = %err, "Failed to close round");
                    report.failures += 1;
                }
            }
        }

        for round in self.storage.list_rounds(&[RoundStatus::Finalizing]).await? {
            if round.finalization_mode != FinalizationMode::Auto
                || report.closed.contains(&round.id)
            {
                continue;
            }
            match self.rounds.finalize_round(&actor, &round.id).await {
                Ok(outcome) if outcome.is_accepted() => report.finalized.push(round.id),
                Ok(_) => {}
                Err(err) => {
                    error!(round_id = %round.id, error = %err, "Failed to finalize round");
                    report.failures += 1;
                }
            }
        }

        match self.tiebreakers.sweep(now).await {
            Ok(resolved) => {
                report
                    .tiebreakers_resolved
                    .extend(resolved.iter().map(|tb| tb.id().clone()));
            }
            Err(err) => {
                error!(error = %err, "Tiebreaker sweep failed");
                report.failures += 1;
            }
        }

        for round in self.storage.list_rounds(&[RoundStatus::Tiebreaker]).await? {
            match self.rounds.reconcile(&actor, &round.id).await {
                Ok(outcome) => {
                    let completed = outcome
                        .state
                        .as_ref()
                        .is_some_and(|r| r.round.status == RoundStatus::Completed);
                    if outcome.is_accepted() && completed {
                        report.completed.push(round.id);
                    }
                }
                Err(err) => {
                    error!(round_id = %round.id, error = %err, "Failed to reconcile round");
                    report.failures += 1;
                }
            }
        }

        if report.is_idle() {
            debug!("Deadline sweep found nothing to do");
        } else {
            info!(
                closed = report.closed.len(),
                finalized = report.finalized.len(),
                tiebreakers = report.tiebreakers_resolved.len(),
                completed = report.completed.len(),
                failures = report.failures,
                "Deadline sweep finished"
            );
        }
        Ok(report)
    }
}
