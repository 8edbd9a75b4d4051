//! Continuous tiebreaker
//!
//! An open ascending auction between the tied bidders. Every accepted raise
//! must beat the standing high and restarts the inactivity clock. The
//! auction closes when the clock runs out or only one bidder remains.

use super::{redact, rejection_detail, unknown, Tiebreak, TiebreakView, TiebreakerDesk};
use crate::error::{EngineError, EngineResult};
use crate::resolver::{rank_offers, Offer};
use auction_storage::{StorageError, TiebreakerWrite};
use auction_types::{
    Actor, AllocationSource, Amount, AuctionEvent, BidderId, ContinuousParticipant,
    ContinuousTiebreaker, ItemId, Outcome, RaiseEvent, ReasonCode, ResolveMode, RoundId,
    TiebreakResolution, Tiebreaker, TiebreakerId, TiebreakerStatus,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, instrument};

pub(super) fn open(
    round_id: RoundId,
    item_id: ItemId,
    tied_amount: Amount,
    tied: &[Offer],
    inactivity_timeout_secs: u64,
    now: DateTime<Utc>,
) -> ContinuousTiebreaker {
    ContinuousTiebreaker {
        id: TiebreakerId::generate(),
        round_id,
        item_id,
        status: TiebreakerStatus::Active,
        opening_amount: tied_amount,
        current_high_amount: tied_amount,
        current_high_bidder: None,
        participants: tied
            .iter()
            .map(|offer| ContinuousParticipant {
                bidder_id: offer.bidder_id.clone(),
                bid_id: offer.bid_id.clone(),
                withdrawn: false,
            })
            .collect(),
        inactivity_timeout_secs,
        opened_at: now,
        last_activity_at: now,
        resolution: None,
        resolved_at: None,
    }
}

/// A continuous tiebreaker together with its raise log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContinuousBook {
    pub tiebreaker: ContinuousTiebreaker,
    pub raises: Vec<RaiseEvent>,
}

impl ContinuousBook {
    pub fn new(tiebreaker: ContinuousTiebreaker, mut raises: Vec<RaiseEvent>) -> Self {
        raises.sort_by_key(|raise| raise.sequence);
        Self { tiebreaker, raises }
    }

    /// Standing high rebuilt from the raise log alone.
    pub fn replay(&self) -> (Amount, Option<BidderId>) {
        self.raises.iter().fold(
            (self.tiebreaker.opening_amount, None),
            |(high, leader), raise| {
                if raise.amount > high {
                    (raise.amount, Some(raise.bidder_id.clone()))
                } else {
                    (high, leader)
                }
            },
        )
    }

    /// Raises strictly increase and the stored high matches the log.
    pub fn is_consistent(&self) -> bool {
        let increasing = self
            .raises
            .windows(2)
            .all(|pair| pair[1].amount > pair[0].amount);
        let (high, leader) = self.replay();
        increasing
            && high == self.tiebreaker.current_high_amount
            && leader == self.tiebreaker.current_high_bidder
    }
}

impl Tiebreak for ContinuousBook {
    fn tiebreaker_id(&self) -> &TiebreakerId {
        &self.tiebreaker.id
    }

    fn round_id(&self) -> &RoundId {
        &self.tiebreaker.round_id
    }

    fn item_id(&self) -> &ItemId {
        &self.tiebreaker.item_id
    }

    fn status(&self) -> TiebreakerStatus {
        self.tiebreaker.status
    }

    fn resolution(&self) -> Option<&TiebreakResolution> {
        self.tiebreaker.resolution.as_ref()
    }

    fn source(&self) -> AllocationSource {
        AllocationSource::Continuous {
            tiebreaker_id: self.tiebreaker.id.clone(),
        }
    }

    /// Each remaining bidder's best raise. Bidders who never raised stand at
    /// the opening amount, or at the standing high when they are alone.
    fn final_offers(&self) -> Vec<Offer> {
        let tb = &self.tiebreaker;
        let mut best: HashMap<&BidderId, &RaiseEvent> = HashMap::new();
        for raise in &self.raises {
            let entry = best.entry(&raise.bidder_id).or_insert(raise);
            if raise.amount > entry.amount {
                *entry = raise;
            }
        }

        let remaining = tb.remaining();
        let alone = remaining.len() == 1;
        rank_offers(
            remaining
                .into_iter()
                .map(|p| match best.get(&p.bidder_id) {
                    Some(raise) => Offer {
                        bidder_id: p.bidder_id.clone(),
                        bid_id: p.bid_id.clone(),
                        amount: raise.amount,
                        submitted_at: raise.at,
                        deferred: false,
                    },
                    None => Offer {
                        bidder_id: p.bidder_id.clone(),
                        bid_id: p.bid_id.clone(),
                        amount: if alone {
                            tb.current_high_amount
                        } else {
                            tb.opening_amount
                        },
                        submitted_at: tb.opened_at,
                        deferred: true,
                    },
                })
                .collect(),
        )
    }

    fn unanswered(&self) -> bool {
        self.raises.is_empty() && self.tiebreaker.remaining().len() > 1
    }
}

impl TiebreakerDesk {
    /// Outbid the standing high.
    #[instrument(skip(self, actor), fields(tiebreaker_id = %id, bidder = %bidder_id))]
    pub async fn raise(
        &self,
        actor: &Actor,
        id: &TiebreakerId,
        bidder_id: &BidderId,
        amount: Amount,
    ) -> EngineResult<Outcome<Tiebreaker>> {
        if !actor.acts_for(bidder_id) {
            return Ok(Outcome::rejected(
                ReasonCode::Unauthorized,
                "raises may only be placed by the bidder",
                None,
            ));
        }
        let Some(current) = self.storage.get_tiebreaker(id).await? else {
            return Ok(unknown(id));
        };
        let Tiebreaker::Continuous(auction) = &current else {
            return Ok(Outcome::rejected(
                ReasonCode::UnknownTiebreaker,
                format!("{} is not a continuous tiebreaker", id),
                Some(redact(current)),
            ));
        };
        if amount <= auction.current_high_amount {
            return Ok(Outcome::rejected(
                ReasonCode::BelowCurrentHigh,
                rejection_detail(ReasonCode::BelowCurrentHigh, &current),
                Some(current),
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
                Some(current),
            ));
        }

        let now = self.clock.now();
        let write = match self.storage.apply_raise(id, bidder_id, amount, now).await {
            Err(StorageError::NotFound(_)) => return Ok(unknown(id)),
            other => other?,
        };
        match write {
            TiebreakerWrite::Applied(tb) => {
                debug!(amount, "Raise accepted");
                self.notifier
                    .emit(
                        actor,
                        AuctionEvent::RaiseAccepted {
                            tiebreaker_id: id.clone(),
                            bidder_id: bidder_id.clone(),
                            amount,
                        },
                        now,
                    )
                    .await;
                Ok(Outcome::accepted(tb))
            }
            TiebreakerWrite::Rejected { code, current } => Ok(Outcome::rejected(
                code,
                rejection_detail(code, &current),
                Some(current),
            )),
        }
    }

    /// Leave a continuous auction. The last bidder standing wins at once.
    #[instrument(skip(self, actor), fields(tiebreaker_id = %id, bidder = %bidder_id))]
    pub async fn withdraw(
        &self,
        actor: &Actor,
        id: &TiebreakerId,
        bidder_id: &BidderId,
    ) -> EngineResult<Outcome<Tiebreaker>> {
        if !actor.acts_for(bidder_id) {
            return Ok(Outcome::rejected(
                ReasonCode::Unauthorized,
                "only the bidder may withdraw",
                None,
            ));
        }
        let now = self.clock.now();
        let write = match self.storage.withdraw_participant(id, bidder_id, now).await {
            Err(StorageError::NotFound(_)) => return Ok(unknown(id)),
            other => other?,
        };
        match write {
            TiebreakerWrite::Applied(tb) => {
                self.notifier
                    .emit(
                        actor,
                        AuctionEvent::ParticipantWithdrew {
                            tiebreaker_id: id.clone(),
                            bidder_id: bidder_id.clone(),
                        },
                        now,
                    )
                    .await;

                let last_standing = tb
                    .as_continuous()
                    .is_some_and(|auction| auction.remaining().len() == 1);
                if !last_standing {
                    return Ok(Outcome::accepted(tb));
                }
                info!("One participant left, closing auction");
                let snapshot = tb.clone();
                let view = TiebreakView::load(self.storage.as_ref(), tb).await?;
                let resolved = self.resolve_view(actor, view, ResolveMode::Auto).await?;
                Ok(Outcome::accepted(resolved.state.unwrap_or(snapshot)))
            }
            TiebreakerWrite::Rejected { code, current } => Ok(Outcome::rejected(
                code,
                rejection_detail(code, &current),
                Some(current),
            )),
        }
    }
}

/// Refuse a book whose raise log disagrees with its standing high.
pub(super) fn checked(book: ContinuousBook) -> EngineResult<ContinuousBook> {
    if book.is_consistent() {
        Ok(book)
    } else {
        Err(EngineError::InvariantViolation(format!(
            "raise log of {} does not replay to its standing high",
            book.tiebreaker.id
        )))
    }
}
