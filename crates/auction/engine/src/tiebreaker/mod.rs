//! Tiebreaker desk
//!
//! Opens, drives and resolves the sub-auctions that settle tied items.
//! The two flavours share resolution and settlement; their bidder-facing
//! operations live in [`fixed`] and [`continuous`].

mod continuous;
mod fixed;

pub use continuous::ContinuousBook;

use crate::budget::{BudgetLedger, ReserveDecision};
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::notify::Notifier;
use crate::resolver::{AllocationResolver, Offer};
use auction_storage::{AuctionStorage, StorageError, TiebreakerWrite};
use auction_types::{
    Actor, AllocationSource, Amount, AuctionEvent, ExclusionReason, ItemId, Outcome, ReasonCode,
    ResolveMode, Round, RoundId, RoundStatus, TiebreakKind, TiebreakResolution, Tiebreaker,
    TiebreakerId, TiebreakerStatus,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// Behaviour shared by both tiebreaker flavours
pub trait Tiebreak {
    fn tiebreaker_id(&self) -> &TiebreakerId;
    fn round_id(&self) -> &RoundId;
    fn item_id(&self) -> &ItemId;
    fn status(&self) -> TiebreakerStatus;
    fn resolution(&self) -> Option<&TiebreakResolution>;

    /// Provenance recorded on the resulting allocation
    fn source(&self) -> AllocationSource;

    /// Every remaining candidate, best first.
    fn final_offers(&self) -> Vec<Offer>;

    /// True when the tied bidders never acted.
    fn unanswered(&self) -> bool;
}

/// A tiebreaker with whatever else is needed to rank its offers
#[derive(Debug, Clone)]
pub enum TiebreakView {
    FixedWindow(auction_types::FixedWindowTiebreaker),
    Continuous(ContinuousBook),
}

impl TiebreakView {
    pub async fn load(storage: &dyn AuctionStorage, tiebreaker: Tiebreaker) -> EngineResult<Self> {
        Ok(match tiebreaker {
            Tiebreaker::FixedWindow(tb) => TiebreakView::FixedWindow(tb),
            Tiebreaker::Continuous(tb) => {
                let raises = storage.list_raise_events(&tb.id).await?;
                TiebreakView::Continuous(continuous::checked(ContinuousBook::new(tb, raises))?)
            }
        })
    }

    pub fn tiebreaker(&self) -> Tiebreaker {
        match self {
            TiebreakView::FixedWindow(tb) => Tiebreaker::FixedWindow(tb.clone()),
            TiebreakView::Continuous(book) => Tiebreaker::Continuous(book.tiebreaker.clone()),
        }
    }

    fn inner(&self) -> &dyn Tiebreak {
        match self {
            TiebreakView::FixedWindow(tb) => tb,
            TiebreakView::Continuous(book) => book,
        }
    }
}

impl Tiebreak for TiebreakView {
    fn tiebreaker_id(&self) -> &TiebreakerId {
        self.inner().tiebreaker_id()
    }

    fn round_id(&self) -> &RoundId {
        self.inner().round_id()
    }

    fn item_id(&self) -> &ItemId {
        self.inner().item_id()
    }

    fn status(&self) -> TiebreakerStatus {
        self.inner().status()
    }

    fn resolution(&self) -> Option<&TiebreakResolution> {
        self.inner().resolution()
    }

    fn source(&self) -> AllocationSource {
        self.inner().source()
    }

    fn final_offers(&self) -> Vec<Offer> {
        self.inner().final_offers()
    }

    fn unanswered(&self) -> bool {
        self.inner().unanswered()
    }
}

/// Build the tiebreaker a round's configuration asks for.
pub(crate) fn open(
    round: &Round,
    item_id: ItemId,
    tied_amount: Amount,
    tied: &[Offer],
    config: &EngineConfig,
    now: DateTime<Utc>,
) -> Tiebreaker {
    match round.tiebreak_kind {
        TiebreakKind::FixedWindow => Tiebreaker::FixedWindow(fixed::open(
            round.id.clone(),
            item_id,
            tied_amount,
            tied,
            config.default_tiebreaker_minutes,
            now,
        )),
        TiebreakKind::Continuous => Tiebreaker::Continuous(continuous::open(
            round.id.clone(),
            item_id,
            tied_amount,
            tied,
            config.continuous_inactivity_secs,
            now,
        )),
    }
}

/// Public projection of a tiebreaker. Revised amounts stay hidden while a
/// fixed window is running.
pub fn redact(tiebreaker: Tiebreaker) -> Tiebreaker {
    match tiebreaker {
        Tiebreaker::FixedWindow(mut tb) if tb.status == TiebreakerStatus::Active => {
            for participant in &mut tb.participants {
                participant.revised_amount = None;
            }
            Tiebreaker::FixedWindow(tb)
        }
        other => other,
    }
}

/// Tiebreaker operations
pub struct TiebreakerDesk {
    storage: Arc<dyn AuctionStorage>,
    budget: Arc<BudgetLedger>,
    resolver: Arc<AllocationResolver>,
    notifier: Notifier,
    clock: Arc<dyn Clock>,
}

impl TiebreakerDesk {
    pub fn new(
        storage: Arc<dyn AuctionStorage>,
        budget: Arc<BudgetLedger>,
        resolver: Arc<AllocationResolver>,
        notifier: Notifier,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            storage,
            budget,
            resolver,
            notifier,
            clock,
        }
    }

    pub async fn view(&self, id: &TiebreakerId) -> EngineResult<Option<TiebreakView>> {
        match self.storage.get_tiebreaker(id).await? {
            Some(tb) => Ok(Some(TiebreakView::load(self.storage.as_ref(), tb).await?)),
            None => Ok(None),
        }
    }

    /// Redacted tiebreaker state for public reads.
    pub async fn detail(&self, id: &TiebreakerId) -> EngineResult<Option<Tiebreaker>> {
        Ok(self.storage.get_tiebreaker(id).await?.map(redact))
    }

    pub async fn list_for_round(&self, round_id: &RoundId) -> EngineResult<Vec<Tiebreaker>> {
        Ok(self
            .storage
            .list_round_tiebreakers(round_id)
            .await?
            .into_iter()
            .map(redact)
            .collect())
    }

    /// Operator resolution of either flavour.
    #[instrument(skip(self, actor), fields(tiebreaker_id = %id))]
    pub async fn resolve(
        &self,
        actor: &Actor,
        id: &TiebreakerId,
        mode: ResolveMode,
    ) -> EngineResult<Outcome<Tiebreaker>> {
        if !actor.is_operator() {
            return Ok(Outcome::rejected(
                ReasonCode::Unauthorized,
                "only operators may resolve tiebreakers",
                None,
            ));
        }
        let Some(view) = self.view(id).await? else {
            return Ok(unknown(id));
        };
        self.resolve_view(actor, view, mode).await
    }

    /// Operator close of a continuous auction: resolve it as it stands.
    pub async fn close(&self, actor: &Actor, id: &TiebreakerId) -> EngineResult<Outcome<Tiebreaker>> {
        self.resolve(actor, id, ResolveMode::Auto).await
    }

    /// Lengthen a running fixed window.
    #[instrument(skip(self, actor), fields(tiebreaker_id = %id))]
    pub async fn extend(
        &self,
        actor: &Actor,
        id: &TiebreakerId,
        minutes: u32,
    ) -> EngineResult<Outcome<Tiebreaker>> {
        if !actor.is_operator() {
            return Ok(Outcome::rejected(
                ReasonCode::Unauthorized,
                "only operators may extend tiebreakers",
                None,
            ));
        }
        if minutes == 0 {
            return Ok(Outcome::rejected(
                ReasonCode::InvalidWindow,
                "extension must be at least one minute",
                None,
            ));
        }
        let now = self.clock.now();
        let write = match self.storage.extend_tiebreaker(id, minutes, now).await {
            Err(StorageError::NotFound(_)) => return Ok(unknown(id)),
            other => other?,
        };
        match write {
            TiebreakerWrite::Applied(tb) => {
                info!(minutes, "Tiebreaker window extended");
                self.notifier
                    .emit(
                        actor,
                        AuctionEvent::TiebreakerExtended {
                            tiebreaker_id: id.clone(),
                            duration_minutes: minutes,
                        },
                        now,
                    )
                    .await;
                Ok(Outcome::accepted(redact(tb)))
            }
            TiebreakerWrite::Rejected { code, current } => Ok(Outcome::rejected(
                code,
                rejection_detail(code, &current),
                Some(redact(current)),
            )),
        }
    }

    /// Resolve every fixed window past its deadline and every continuous
    /// auction past its idle timeout. Failures are logged and skipped.
    pub async fn sweep(&self, now: DateTime<Utc>) -> EngineResult<Vec<Tiebreaker>> {
        let actor = Actor::scheduler();
        let mut resolved = Vec::new();
        for tb in self.storage.list_active_tiebreakers().await? {
            let due = match &tb {
                Tiebreaker::FixedWindow(fixed) => fixed.is_expired(now),
                Tiebreaker::Continuous(cont) => cont.is_idle(now),
            };
            if !due {
                continue;
            }
            let id = tb.id().clone();
            let resolved_view = match TiebreakView::load(self.storage.as_ref(), tb).await {
                Ok(view) => self.resolve_view(&actor, view, ResolveMode::Auto).await,
                Err(err) => Err(err),
            };
            match resolved_view {
                Ok(outcome) if outcome.is_accepted() => {
                    if let Some(tb) = outcome.state {
                        resolved.push(tb);
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    error!(tiebreaker_id = %id, error = %err, "Failed to resolve tiebreaker");
                }
            }
        }
        Ok(resolved)
    }

    /// Resolve without an authorization check, then settle the item.
    pub(crate) async fn resolve_view(
        &self,
        actor: &Actor,
        view: TiebreakView,
        mode: ResolveMode,
    ) -> EngineResult<Outcome<Tiebreaker>> {
        if view.status() == TiebreakerStatus::Resolved {
            return Ok(Outcome::no_op(view.tiebreaker()));
        }
        let round = self
            .storage
            .get_round(view.round_id())
            .await?
            .ok_or_else(|| {
                EngineError::InvariantViolation(format!(
                    "{} refers to missing {}",
                    view.tiebreaker_id(),
                    view.round_id()
                ))
            })?;

        let resolution = match mode {
            ResolveMode::Exclude => TiebreakResolution::Excluded {
                reason: ExclusionReason::TiebreakerExcluded,
            },
            ResolveMode::Auto if round.status == RoundStatus::Cancelled => {
                TiebreakResolution::Excluded {
                    reason: ExclusionReason::TiebreakerExcluded,
                }
            }
            ResolveMode::Auto => self.pick_winner(&round, &view).await?,
        };

        let now = self.clock.now();
        match self
            .storage
            .resolve_tiebreaker(view.tiebreaker_id(), resolution.clone(), now)
            .await?
        {
            TiebreakerWrite::Applied(tb) => {
                let winner = match &resolution {
                    TiebreakResolution::Winner { bidder_id, .. } => Some(bidder_id.clone()),
                    TiebreakResolution::Excluded { .. } => None,
                };
                info!(
                    tiebreaker_id = %tb.id(),
                    winner = ?winner,
                    "Tiebreaker resolved"
                );
                self.notifier
                    .emit(
                        actor,
                        AuctionEvent::TiebreakerResolved {
                            round_id: tb.round_id().clone(),
                            tiebreaker_id: tb.id().clone(),
                            item_id: tb.item_id().clone(),
                            winner,
                        },
                        now,
                    )
                    .await;
                // The resolution is committed; reconcile retries a failed settle.
                if let Err(err) = self.resolver.settle_tiebreaker(actor, &tb).await {
                    error!(tiebreaker_id = %tb.id(), error = %err, "Failed to settle resolved tiebreaker");
                }
                Ok(Outcome::accepted(tb))
            }
            TiebreakerWrite::Rejected { current, .. } => Ok(Outcome::no_op(redact(current))),
        }
    }

    /// First ranked offer that passes the budget rules.
    async fn pick_winner(
        &self,
        round: &Round,
        view: &TiebreakView,
    ) -> EngineResult<TiebreakResolution> {
        if view.unanswered() {
            return Ok(TiebreakResolution::Excluded {
                reason: ExclusionReason::TiebreakerUnanswered,
            });
        }
        let policy = self.budget.policy(&round.series_id).await?;
        for offer in view.final_offers() {
            let account = self.budget.peek_account(&offer.bidder_id).await?;
            let decision =
                ReserveDecision::evaluate(&policy, round.round_number, &account, offer.amount);
            if decision.is_allowed() {
                return Ok(TiebreakResolution::Winner {
                    bidder_id: offer.bidder_id,
                    amount: offer.amount,
                    bid_id: offer.bid_id,
                });
            }
            warn!(
                bidder = %offer.bidder_id,
                amount = offer.amount,
                reason = %decision.describe(),
                "Tiebreaker offer fails budget rules"
            );
        }
        Ok(TiebreakResolution::Excluded {
            reason: ExclusionReason::NoQualifyingBids,
        })
    }

    /// Round the tiebreaker belongs to, for budget lookups.
    async fn round_of(&self, tiebreaker: &Tiebreaker) -> EngineResult<Round> {
        self.storage
            .get_round(tiebreaker.round_id())
            .await?
            .ok_or_else(|| {
                EngineError::InvariantViolation(format!(
                    "{} refers to missing {}",
                    tiebreaker.id(),
                    tiebreaker.round_id()
                ))
            })
    }
}

fn unknown<T>(id: &TiebreakerId) -> Outcome<T> {
    Outcome::rejected(
        ReasonCode::UnknownTiebreaker,
        format!("{} does not exist", id),
        None,
    )
}

fn rejection_detail(code: ReasonCode, current: &Tiebreaker) -> String {
    match (code, current) {
        (ReasonCode::TiebreakerNotActive, _) => format!("{} is already resolved", current.id()),
        (ReasonCode::RevisionBelowTiedAmount, Tiebreaker::FixedWindow(tb)) => {
            format!("revision must be at least {}", tb.tied_amount)
        }
        (ReasonCode::BelowCurrentHigh, Tiebreaker::Continuous(tb)) => {
            format!("raise must exceed {}", tb.current_high_amount)
        }
        (ReasonCode::WindowExpired, _) => format!("{} no longer accepts actions", current.id()),
        (ReasonCode::NotExtendable, _) => "continuous auctions close on inactivity".to_string(),
        (other, _) => format!("{:?}", other),
    }
}
