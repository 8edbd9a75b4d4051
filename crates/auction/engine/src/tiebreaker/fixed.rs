//! Fixed-window tiebreaker
//!
//! Each tied bidder gets one revision, at or above the tied amount, before
//! the window closes. The window resolves early once everybody has
//! submitted. Bidders who stay silent keep their tied bid but rank after
//! every submitter.

use super::{redact, rejection_detail, unknown, Tiebreak, TiebreakView, TiebreakerDesk};
use crate::error::EngineResult;
use crate::resolver::{rank_offers, Offer};
use auction_storage::{StorageError, TiebreakerWrite};
use auction_types::{
    Actor, AllocationSource, Amount, AuctionEvent, BidderId, FixedWindowParticipant,
    FixedWindowTiebreaker, ItemId, Outcome, ReasonCode, ResolveMode, RoundId, TiebreakResolution,
    Tiebreaker, TiebreakerId, TiebreakerStatus,
};
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument};

pub(super) fn open(
    round_id: RoundId,
    item_id: ItemId,
    tied_amount: Amount,
    tied: &[Offer],
    duration_minutes: u32,
    now: DateTime<Utc>,
) -> FixedWindowTiebreaker {
    FixedWindowTiebreaker {
        id: TiebreakerId::generate(),
        round_id,
        item_id,
        status: TiebreakerStatus::Active,
        tied_amount,
        duration_minutes,
        opened_at: now,
        participants: tied
            .iter()
            .map(|offer| FixedWindowParticipant {
                bidder_id: offer.bidder_id.clone(),
                bid_id: offer.bid_id.clone(),
                previous_amount: offer.amount,
                revised_amount: None,
                has_submitted: false,
                submitted_at: None,
            })
            .collect(),
        resolution: None,
        resolved_at: None,
    }
}

impl Tiebreak for FixedWindowTiebreaker {
    fn tiebreaker_id(&self) -> &TiebreakerId {
        &self.id
    }

    fn round_id(&self) -> &RoundId {
        &self.round_id
    }

    fn item_id(&self) -> &ItemId {
        &self.item_id
    }

    fn status(&self) -> TiebreakerStatus {
        self.status
    }

    fn resolution(&self) -> Option<&TiebreakResolution> {
        self.resolution.as_ref()
    }

    fn source(&self) -> AllocationSource {
        AllocationSource::FixedWindow {
            tiebreaker_id: self.id.clone(),
        }
    }

    fn final_offers(&self) -> Vec<Offer> {
        rank_offers(
            self.participants
                .iter()
                .map(|p| match (p.revised_amount, p.submitted_at) {
                    (Some(amount), Some(submitted_at)) if p.has_submitted => Offer {
                        bidder_id: p.bidder_id.clone(),
                        bid_id: p.bid_id.clone(),
                        amount,
                        submitted_at,
                        deferred: false,
                    },
                    _ => Offer {
                        bidder_id: p.bidder_id.clone(),
                        bid_id: p.bid_id.clone(),
                        amount: p.previous_amount,
                        submitted_at: self.opened_at,
                        deferred: true,
                    },
                })
                .collect(),
        )
    }

    fn unanswered(&self) -> bool {
        self.submitted_count() == 0
    }
}

impl TiebreakerDesk {
    /// Record a tied bidder's one revision.
    #[instrument(skip(self, actor), fields(tiebreaker_id = %id, bidder = %bidder_id))]
    pub async fn submit_revision(
        &self,
        actor: &Actor,
        id: &TiebreakerId,
        bidder_id: &BidderId,
        amount: Amount,
    ) -> EngineResult<Outcome<Tiebreaker>> {
        if !actor.acts_for(bidder_id) {
            return Ok(Outcome::rejected(
                ReasonCode::Unauthorized,
                "revisions may only be submitted by the bidder",
                None,
            ));
        }
        let Some(current) = self.storage.get_tiebreaker(id).await? else {
            return Ok(unknown(id));
        };
        let Tiebreaker::FixedWindow(window) = &current else {
            return Ok(Outcome::rejected(
                ReasonCode::UnknownTiebreaker,
                format!("{} is not a fixed-window tiebreaker", id),
                Some(redact(current)),
            ));
        };
        if amount < window.tied_amount {
            return Ok(Outcome::rejected(
                ReasonCode::RevisionBelowTiedAmount,
                rejection_detail(ReasonCode::RevisionBelowTiedAmount, &current),
                Some(redact(current)),
            ));
        }

        let round = self.round_of(&current).await?;
        let max = self
            .budget
            .max_bid(bidder_id, &round.series_id, round.round_number)
            .await?;
        if amount > max {
            return Ok(Outcome::rejected(
                ReasonCode::ReserveBreach,
                format!("at most {} can be offered in round {}", max, round.round_number),
                Some(redact(current)),
            ));
        }

        let now = self.clock.now();
        let write = match self.storage.record_revision(id, bidder_id, amount, now).await {
            Err(StorageError::NotFound(_)) => return Ok(unknown(id)),
            other => other?,
        };
        match write {
            TiebreakerWrite::Applied(tb) => {
                debug!("Revision recorded");
                self.notifier
                    .emit(
                        actor,
                        AuctionEvent::RevisionSubmitted {
                            tiebreaker_id: id.clone(),
                            bidder_id: bidder_id.clone(),
                        },
                        now,
                    )
                    .await;

                let everyone_in = tb.as_fixed().is_some_and(|w| w.all_submitted());
                if !everyone_in {
                    return Ok(Outcome::accepted(redact(tb)));
                }
                info!("All participants submitted, resolving early");
                let snapshot = redact(tb.clone());
                let resolved = self
                    .resolve_view(actor, TiebreakView::FixedWindow(fixed_of(tb)?), ResolveMode::Auto)
                    .await?;
                Ok(Outcome::accepted(resolved.state.unwrap_or(snapshot)))
            }
            TiebreakerWrite::Rejected { code, current } => Ok(Outcome::rejected(
                code,
                rejection_detail(code, &current),
                Some(redact(current)),
            )),
        }
    }
}

fn fixed_of(tiebreaker: Tiebreaker) -> EngineResult<FixedWindowTiebreaker> {
    match tiebreaker {
        Tiebreaker::FixedWindow(tb) => Ok(tb),
        Tiebreaker::Continuous(tb) => Err(crate::error::EngineError::InvariantViolation(format!(
            "{} changed flavour during a revision",
            tb.id
        ))),
    }
}
