//! Allocation resolver
//!
//! Turns a round's revealed bids into allocations, exclusions and
//! tiebreakers. Items are processed richest contest first so that, in a
//! multi-item round, a bidder's budget is spent where they bid highest.
//!
//! Per item:
//! 1. take the highest tier of offers
//! 2. drop tier members that fail the reserve check
//! 3. one qualifier wins; several open a tiebreaker; none falls through
//!    to the next tier
//! 4. commit atomically; a commit-time budget failure disqualifies the
//!    winner and the walk continues
//!
//! Runs are re-entrant: items already settled are skipped and items with
//! an active tiebreaker are left alone. Concurrent runs of one round may
//! race on an item; the loser reports `LostRace` and writes nothing.
//!
//! A resolved tiebreaker that produced no affordable winner hands the item
//! back to the tier walk below the tied amount.

use crate::budget::{BudgetLedger, ReserveDecision};
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::notify::Notifier;
use crate::tiebreaker::{self, Tiebreak, TiebreakView};
use auction_storage::{
    AllocationCommit, AuctionStorage, CommitOutcome, ExclusionWrite, TiebreakerInsert,
};
use auction_types::{
    Actor, Allocation, AllocationSource, Amount, AuctionEvent, Bid, BidId, BidderAccount, BidderId,
    ExclusionReason, ItemExclusion, ItemId, PhasePolicy, Round, RoundId, TiebreakResolution,
    Tiebreaker, TiebreakerId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// A candidate for an item: an original bid, a revision or a raise
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offer {
    pub bidder_id: BidderId,
    pub bid_id: BidId,
    pub amount: Amount,
    pub submitted_at: DateTime<Utc>,

    /// Ranks after every non-deferred offer of the same amount
    pub deferred: bool,
}

/// Best first: amount, then non-deferred, then earliest, then bidder id.
pub fn rank_offers(mut offers: Vec<Offer>) -> Vec<Offer> {
    offers.sort_by(|a, b| {
        b.amount
            .cmp(&a.amount)
            .then_with(|| a.deferred.cmp(&b.deferred))
            .then_with(|| a.submitted_at.cmp(&b.submitted_at))
            .then_with(|| a.bidder_id.cmp(&b.bidder_id))
    });
    offers
}

/// What happened, or would happen, to one item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "plan", rename_all = "snake_case")]
pub enum ItemPlan {
    Allocate {
        item_id: ItemId,
        bidder_id: BidderId,
        price: Amount,
        source: AllocationSource,
    },
    /// Preview only: a tiebreaker would open
    Tie {
        item_id: ItemId,
        amount: Amount,
        bidders: Vec<BidderId>,
    },
    AwaitingTiebreaker {
        item_id: ItemId,
        tiebreaker_id: TiebreakerId,
    },
    Exclude {
        item_id: ItemId,
        reason: ExclusionReason,
    },
    /// Already allocated or excluded by an earlier run
    Settled { item_id: ItemId },
    /// A concurrent run of the same round settled the item first
    LostRace { item_id: ItemId },
}

impl ItemPlan {
    pub fn item_id(&self) -> &ItemId {
        match self {
            ItemPlan::Allocate { item_id, .. }
            | ItemPlan::Tie { item_id, .. }
            | ItemPlan::AwaitingTiebreaker { item_id, .. }
            | ItemPlan::Exclude { item_id, .. }
            | ItemPlan::Settled { item_id }
            | ItemPlan::LostRace { item_id } => item_id,
        }
    }
}

/// A bidder dropped from an item by the budget rules
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disqualification {
    pub item_id: ItemId,
    pub bidder_id: BidderId,
    pub amount: Amount,
    pub decision: ReserveDecision,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionReport {
    pub round_id: RoundId,
    pub items: Vec<ItemPlan>,
    pub disqualified: Vec<Disqualification>,
}

impl ResolutionReport {
    fn new(round_id: RoundId) -> Self {
        Self {
            round_id,
            items: Vec::new(),
            disqualified: Vec::new(),
        }
    }

    pub fn plan_for(&self, item_id: &ItemId) -> Option<&ItemPlan> {
        self.items.iter().find(|plan| plan.item_id() == item_id)
    }

    pub fn lost_race(&self) -> bool {
        self.items
            .iter()
            .any(|plan| matches!(plan, ItemPlan::LostRace { .. }))
    }

    /// True when the run found every item already settled.
    pub fn all_settled(&self) -> bool {
        self.items
            .iter()
            .all(|plan| matches!(plan, ItemPlan::Settled { .. }))
    }
}

/// Account snapshots for one run. A preview charges them in memory so
/// later items see the spending of earlier ones.
struct Projection {
    live: bool,
    accounts: HashMap<BidderId, BidderAccount>,
}

impl Projection {
    fn new(live: bool) -> Self {
        Self {
            live,
            accounts: HashMap::new(),
        }
    }

    async fn account(
        &mut self,
        budget: &BudgetLedger,
        bidder_id: &BidderId,
    ) -> EngineResult<BidderAccount> {
        if let Some(account) = self.accounts.get(bidder_id) {
            return Ok(account.clone());
        }
        let account = if self.live {
            budget.account(bidder_id).await?
        } else {
            budget.peek_account(bidder_id).await?
        };
        self.accounts.insert(bidder_id.clone(), account.clone());
        Ok(account)
    }

    fn record(&mut self, account: BidderAccount) {
        self.accounts.insert(account.bidder_id.clone(), account);
    }

    fn charge(&mut self, bidder_id: &BidderId, price: Amount) {
        if let Some(account) = self.accounts.get_mut(bidder_id) {
            account.balance = account.balance.saturating_sub(price);
            account.items_acquired += 1;
        }
    }
}

/// Active revealed bids grouped by item.
fn offer_groups(bids: &[Bid]) -> HashMap<ItemId, Vec<Offer>> {
    let mut groups: HashMap<ItemId, Vec<Offer>> = HashMap::new();
    for bid in bids.iter().filter(|bid| bid.is_active()) {
        if let (Some(item_id), Some(amount)) = (&bid.item_id, bid.revealed_amount) {
            groups.entry(item_id.clone()).or_default().push(Offer {
                bidder_id: bid.bidder_id.clone(),
                bid_id: bid.id.clone(),
                amount,
                submitted_at: bid.submitted_at,
                deferred: false,
            });
        }
    }
    groups
}

/// Offers strictly below a tiebreaker's tied amount.
fn below(offers: Vec<Offer>, tied_amount: Amount) -> Vec<Offer> {
    offers
        .into_iter()
        .filter(|offer| offer.amount < tied_amount)
        .collect()
}

/// Per-run context shared by every item
struct Run<'a> {
    actor: &'a Actor,
    round: &'a Round,
    policy: PhasePolicy,
    projection: Projection,
    report: ResolutionReport,
}

pub struct AllocationResolver {
    storage: Arc<dyn AuctionStorage>,
    budget: Arc<BudgetLedger>,
    notifier: Notifier,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl AllocationResolver {
    pub fn new(
        storage: Arc<dyn AuctionStorage>,
        budget: Arc<BudgetLedger>,
        notifier: Notifier,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        Self {
            storage,
            budget,
            notifier,
            clock,
            config,
        }
    }

    /// Resolve every unsettled item of a revealed round.
    #[instrument(skip(self, actor, round, bids), fields(round_id = %round.id))]
    pub async fn resolve_round(
        &self,
        actor: &Actor,
        round: &Round,
        bids: &[Bid],
    ) -> EngineResult<ResolutionReport> {
        self.run(actor, round, bids, true).await
    }

    /// Compute the resolution without writing anything.
    pub async fn preview(
        &self,
        actor: &Actor,
        round: &Round,
        bids: &[Bid],
    ) -> EngineResult<ResolutionReport> {
        self.run(actor, round, bids, false).await
    }

    async fn run(
        &self,
        actor: &Actor,
        round: &Round,
        bids: &[Bid],
        live: bool,
    ) -> EngineResult<ResolutionReport> {
        let allocated = self
            .storage
            .list_round_allocations(&round.id)
            .await?
            .into_iter()
            .map(|allocation| allocation.item_id)
            .collect::<HashSet<_>>();
        let excluded = self
            .storage
            .list_round_exclusions(&round.id)
            .await?
            .into_iter()
            .map(|exclusion| exclusion.item_id)
            .collect::<HashSet<_>>();
        // Oldest first, so each item keeps its latest tiebreaker.
        let tiebreakers = self
            .storage
            .list_round_tiebreakers(&round.id)
            .await?
            .into_iter()
            .map(|tb| (tb.item_id().clone(), tb))
            .collect::<HashMap<_, _>>();

        let mut groups = offer_groups(bids);

        let mut items = round.items().to_vec();
        items.sort_by_key(|item| {
            let top = groups
                .get(item)
                .and_then(|offers| offers.iter().map(|o| o.amount).max())
                .unwrap_or(0);
            (Reverse(top), item.clone())
        });

        let mut run = Run {
            actor,
            round,
            policy: self.budget.policy(&round.series_id).await?,
            projection: Projection::new(live),
            report: ResolutionReport::new(round.id.clone()),
        };

        for item_id in items {
            let plan = if allocated.contains(&item_id) || excluded.contains(&item_id) {
                ItemPlan::Settled { item_id }
            } else if let Some(tb) = tiebreakers.get(&item_id) {
                if tb.is_active() {
                    ItemPlan::AwaitingTiebreaker {
                        item_id,
                        tiebreaker_id: tb.id().clone(),
                    }
                } else {
                    let view = TiebreakView::load(self.storage.as_ref(), tb.clone()).await?;
                    let offers = groups.remove(&item_id).unwrap_or_default();
                    let lower = below(offers, tb.tied_amount());
                    self.settle_view(&mut run, &view, lower).await?
                }
            } else {
                let offers = groups.remove(&item_id).unwrap_or_default();
                self.decide_item(&mut run, item_id, offers).await?
            };
            run.report.items.push(plan);
        }

        if live {
            info!(
                items = run.report.items.len(),
                disqualified = run.report.disqualified.len(),
                "Round resolution pass finished"
            );
        }
        Ok(run.report)
    }

    async fn decide_item(
        &self,
        run: &mut Run<'_>,
        item_id: ItemId,
        offers: Vec<Offer>,
    ) -> EngineResult<ItemPlan> {
        if offers.is_empty() {
            return self.exclude(run, item_id, ExclusionReason::NoBids).await;
        }

        let mut remaining = rank_offers(offers);
        while let Some(top) = remaining.first().map(|offer| offer.amount) {
            let (tier, rest): (Vec<Offer>, Vec<Offer>) =
                remaining.into_iter().partition(|offer| offer.amount == top);
            remaining = rest;

            let mut qualified = Vec::with_capacity(tier.len());
            for offer in tier {
                let decision = self.evaluate(run, &offer).await?;
                if decision.is_allowed() {
                    qualified.push(offer);
                } else {
                    self.disqualify(run, &item_id, &offer, decision).await?;
                }
            }

            match qualified.len() {
                0 => continue,
                1 => {
                    let offer = qualified.remove(0);
                    match self
                        .commit(run, &item_id, &offer, AllocationSource::Direct)
                        .await?
                    {
                        Ok(plan) => return Ok(plan),
                        Err(decision) => {
                            self.disqualify(run, &item_id, &offer, decision).await?;
                        }
                    }
                }
                _ => return self.open_tiebreaker(run, item_id, top, qualified).await,
            }
        }

        self.exclude(run, item_id, ExclusionReason::NoQualifyingBids)
            .await
    }

    /// Feed a resolved tiebreaker back into allocation.
    ///
    /// Offers are walked best first; a winner that fails the commit-time
    /// budget check is disqualified and the next offer is tried. When no
    /// tied bidder can pay, bids below the tied amount get their turn.
    #[instrument(skip(self, actor, tiebreaker), fields(tiebreaker_id = %tiebreaker.id()))]
    pub async fn settle_tiebreaker(
        &self,
        actor: &Actor,
        tiebreaker: &Tiebreaker,
    ) -> EngineResult<ItemPlan> {
        let round = self
            .storage
            .get_round(tiebreaker.round_id())
            .await?
            .ok_or_else(|| {
                EngineError::InvariantViolation(format!(
                    "{} refers to missing {}",
                    tiebreaker.id(),
                    tiebreaker.round_id()
                ))
            })?;
        let item_id = tiebreaker.item_id();

        let allocated = self
            .storage
            .get_allocation(item_id)
            .await?
            .is_some_and(|allocation| allocation.round_id == round.id);
        let excluded = self
            .storage
            .list_round_exclusions(&round.id)
            .await?
            .iter()
            .any(|exclusion| &exclusion.item_id == item_id);
        if allocated || excluded {
            return Ok(ItemPlan::Settled {
                item_id: item_id.clone(),
            });
        }

        let mut run = Run {
            actor,
            round: &round,
            policy: self.budget.policy(&round.series_id).await?,
            projection: Projection::new(true),
            report: ResolutionReport::new(round.id.clone()),
        };
        let bids = self.storage.list_round_bids(&round.id).await?;
        let lower = below(
            offer_groups(&bids).remove(item_id).unwrap_or_default(),
            tiebreaker.tied_amount(),
        );
        let view = TiebreakView::load(self.storage.as_ref(), tiebreaker.clone()).await?;
        self.settle_view(&mut run, &view, lower).await
    }

    async fn settle_view(
        &self,
        run: &mut Run<'_>,
        view: &TiebreakView,
        lower: Vec<Offer>,
    ) -> EngineResult<ItemPlan> {
        let item_id = view.item_id().clone();
        match view.resolution() {
            None => Ok(ItemPlan::AwaitingTiebreaker {
                item_id,
                tiebreaker_id: view.tiebreaker_id().clone(),
            }),
            Some(TiebreakResolution::Excluded {
                reason: ExclusionReason::NoQualifyingBids,
            }) => self.fall_through(run, item_id, lower).await,
            Some(TiebreakResolution::Excluded { reason }) => {
                let reason = *reason;
                self.exclude(run, item_id, reason).await
            }
            Some(TiebreakResolution::Winner { .. }) => {
                let source = view.source();
                for offer in view.final_offers() {
                    let decision = self.evaluate(run, &offer).await?;
                    if !decision.is_allowed() {
                        self.disqualify(run, &item_id, &offer, decision).await?;
                        continue;
                    }
                    match self.commit(run, &item_id, &offer, source.clone()).await? {
                        Ok(plan) => return Ok(plan),
                        Err(decision) => {
                            self.disqualify(run, &item_id, &offer, decision).await?;
                        }
                    }
                }
                self.fall_through(run, item_id, lower).await
            }
        }
    }

    /// Continue the tier walk below a tiebreaker nobody could pay for.
    async fn fall_through(
        &self,
        run: &mut Run<'_>,
        item_id: ItemId,
        lower: Vec<Offer>,
    ) -> EngineResult<ItemPlan> {
        if lower.is_empty() {
            return self
                .exclude(run, item_id, ExclusionReason::NoQualifyingBids)
                .await;
        }
        info!(item = %item_id, offers = lower.len(), "Falling through to lower bids");
        self.decide_item(run, item_id, lower).await
    }

    async fn evaluate(&self, run: &mut Run<'_>, offer: &Offer) -> EngineResult<ReserveDecision> {
        let account = run
            .projection
            .account(&self.budget, &offer.bidder_id)
            .await?;
        Ok(ReserveDecision::evaluate(
            &run.policy,
            run.round.round_number,
            &account,
            offer.amount,
        ))
    }

    /// `Ok(Err(decision))` means the commit-time budget check refused.
    ///
    /// An item held by another round is a broken invariant: it is recorded
    /// as an `already_allocated` exclusion and the run fails.
    async fn commit(
        &self,
        run: &mut Run<'_>,
        item_id: &ItemId,
        offer: &Offer,
        source: AllocationSource,
    ) -> EngineResult<Result<ItemPlan, ReserveDecision>> {
        let plan = ItemPlan::Allocate {
            item_id: item_id.clone(),
            bidder_id: offer.bidder_id.clone(),
            price: offer.amount,
            source: source.clone(),
        };
        if !run.projection.live {
            run.projection.charge(&offer.bidder_id, offer.amount);
            return Ok(Ok(plan));
        }

        let now = self.clock.now();
        let commit = AllocationCommit {
            allocation: Allocation {
                item_id: item_id.clone(),
                bidder_id: offer.bidder_id.clone(),
                price: offer.amount,
                round_id: run.round.id.clone(),
                bid_id: offer.bid_id.clone(),
                source,
                acquired_at: now,
            },
            reserve_floor: run.policy.reserve_for_round(run.round.round_number),
            max_items: run.policy.max_items_per_bidder,
        };

        let outcome = match self.storage.commit_allocation(commit).await {
            Ok(outcome) => outcome,
            Err(err) => {
                let err = EngineError::from(err);
                if let EngineError::InvariantViolation(detail) = &err {
                    self.report_violation(run, detail).await;
                }
                return Err(err);
            }
        };

        match outcome {
            CommitOutcome::Committed {
                allocation,
                account,
            } => {
                info!(
                    item = %allocation.item_id,
                    bidder = %allocation.bidder_id,
                    price = allocation.price,
                    "Item allocated"
                );
                run.projection.record(account);
                self.notifier
                    .emit(
                        run.actor,
                        AuctionEvent::ItemAllocated {
                            round_id: allocation.round_id.clone(),
                            item_id: allocation.item_id.clone(),
                            bidder_id: allocation.bidder_id.clone(),
                            price: allocation.price,
                        },
                        now,
                    )
                    .await;
                Ok(Ok(plan))
            }
            CommitOutcome::BudgetRejected { account, .. } => {
                let decision = ReserveDecision::evaluate(
                    &run.policy,
                    run.round.round_number,
                    &account,
                    offer.amount,
                );
                run.projection.record(account);
                Ok(Err(decision))
            }
            CommitOutcome::AlreadyAllocated(_) | CommitOutcome::AlreadyExcluded(_) => {
                info!(item = %item_id, "Item settled by a concurrent run");
                Ok(Ok(ItemPlan::LostRace {
                    item_id: item_id.clone(),
                }))
            }
            CommitOutcome::HeldElsewhere(existing) => {
                let detail = format!(
                    "{} is already held by {} through {}",
                    item_id, existing.bidder_id, existing.round_id
                );
                self.report_violation(run, &detail).await;
                self.exclude(run, item_id.clone(), ExclusionReason::AlreadyAllocated)
                    .await?;
                Err(EngineError::InvariantViolation(detail))
            }
        }
    }

    async fn disqualify(
        &self,
        run: &mut Run<'_>,
        item_id: &ItemId,
        offer: &Offer,
        decision: ReserveDecision,
    ) -> EngineResult<()> {
        run.report.disqualified.push(Disqualification {
            item_id: item_id.clone(),
            bidder_id: offer.bidder_id.clone(),
            amount: offer.amount,
            decision,
        });
        if !run.projection.live {
            return Ok(());
        }

        warn!(
            item = %item_id,
            bidder = %offer.bidder_id,
            amount = offer.amount,
            reason = %decision.describe(),
            "Bidder disqualified"
        );
        self.notifier
            .emit(
                run.actor,
                AuctionEvent::BidderDisqualified {
                    round_id: run.round.id.clone(),
                    item_id: item_id.clone(),
                    bidder_id: offer.bidder_id.clone(),
                    reason: decision.describe(),
                },
                self.clock.now(),
            )
            .await;
        Ok(())
    }

    async fn exclude(
        &self,
        run: &mut Run<'_>,
        item_id: ItemId,
        reason: ExclusionReason,
    ) -> EngineResult<ItemPlan> {
        let plan = ItemPlan::Exclude {
            item_id: item_id.clone(),
            reason,
        };
        if !run.projection.live {
            return Ok(plan);
        }

        let now = self.clock.now();
        let write = self
            .storage
            .record_exclusion(ItemExclusion {
                round_id: run.round.id.clone(),
                item_id: item_id.clone(),
                reason,
                recorded_at: now,
            })
            .await?;
        match write {
            ExclusionWrite::Recorded(_) => {
                info!(item = %item_id, ?reason, "Item excluded");
                self.notifier
                    .emit(
                        run.actor,
                        AuctionEvent::ItemExcluded {
                            round_id: run.round.id.clone(),
                            item_id,
                            reason,
                        },
                        now,
                    )
                    .await;
                Ok(plan)
            }
            ExclusionWrite::Existing(_) | ExclusionWrite::Allocated(_) => {
                info!(item = %item_id, "Item settled by a concurrent run");
                Ok(ItemPlan::LostRace { item_id })
            }
        }
    }

    async fn open_tiebreaker(
        &self,
        run: &mut Run<'_>,
        item_id: ItemId,
        amount: Amount,
        tied: Vec<Offer>,
    ) -> EngineResult<ItemPlan> {
        if !run.projection.live {
            return Ok(ItemPlan::Tie {
                item_id,
                amount,
                bidders: tied.into_iter().map(|offer| offer.bidder_id).collect(),
            });
        }

        let now = self.clock.now();
        let tiebreaker =
            tiebreaker::open(run.round, item_id.clone(), amount, &tied, &self.config, now);
        match self.storage.insert_tiebreaker(tiebreaker).await? {
            TiebreakerInsert::Opened(tb) => {
                info!(
                    item = %item_id,
                    tiebreaker_id = %tb.id(),
                    tied_amount = amount,
                    participants = tied.len(),
                    "Tiebreaker opened"
                );
                self.notifier
                    .emit(
                        run.actor,
                        AuctionEvent::TiebreakerOpened {
                            round_id: run.round.id.clone(),
                            tiebreaker_id: tb.id().clone(),
                            item_id: item_id.clone(),
                            kind: run.round.tiebreak_kind,
                            tied_amount: amount,
                            participants: tied.into_iter().map(|offer| offer.bidder_id).collect(),
                        },
                        now,
                    )
                    .await;
                Ok(ItemPlan::AwaitingTiebreaker {
                    item_id,
                    tiebreaker_id: tb.id().clone(),
                })
            }
            TiebreakerInsert::Existing(tb) => Ok(ItemPlan::AwaitingTiebreaker {
                item_id,
                tiebreaker_id: tb.id().clone(),
            }),
        }
    }

    async fn report_violation(&self, run: &Run<'_>, detail: &str) {
        error!(round_id = %run.round.id, detail, "Allocation invariant violated");
        let event = AuctionEvent::InvariantViolated {
            round_id: Some(run.round.id.clone()),
            detail: detail.to_string(),
        };
        self.notifier.emit(run.actor, event, self.clock.now()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn offer(bidder: &str, amount: Amount, offset_secs: i64, deferred: bool) -> Offer {
        Offer {
            bidder_id: BidderId::new(bidder),
            bid_id: BidId::generate(),
            amount,
            submitted_at: DateTime::<Utc>::UNIX_EPOCH + Duration::seconds(offset_secs),
            deferred,
        }
    }

    #[test]
    fn test_ranking_prefers_amount_then_submitters_then_time() {
        let ranked = rank_offers(vec![
            offer("silent", 150, 0, true),
            offer("late", 150, 20, false),
            offer("early", 150, 10, false),
            offer("rich", 200, 30, false),
        ]);
        let order = ranked
            .iter()
            .map(|o| o.bidder_id.as_str().to_string())
            .collect::<Vec<_>>();
        assert_eq!(order, vec!["rich", "early", "late", "silent"]);
    }

    #[test]
    fn test_ranking_is_deterministic_for_identical_offers() {
        let a = offer("a", 100, 5, false);
        let b = offer("b", 100, 5, false);
        let first = rank_offers(vec![b.clone(), a.clone()]);
        let second = rank_offers(vec![a, b]);
        assert_eq!(first, second);
    }
}
