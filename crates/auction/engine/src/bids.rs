//! Bid ledger
//!
//! Accepts sealed bids while a round is active and turns them into
//! plaintext exactly once at reveal. Before reveal nobody, the bidder
//! included, can read an amount back.

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::EngineResult;
use crate::notify::Notifier;
use crate::sealing::Sealer;
use auction_storage::{
    AuctionStorage, BidRemoval, BidReveal, BidWrite, BidWriteMode, RevealOutcome, SealedBidWrite,
};
use auction_types::{
    Actor, Amount, AuctionEvent, Bid, BidId, BidView, BidderId, ItemId, Outcome, ReasonCode,
    Round, RoundId,
};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Sealed bid submission or revision
#[derive(Debug, Clone)]
pub struct BidRequest {
    pub round_id: RoundId,
    pub bidder_id: BidderId,
    pub item_id: ItemId,
    pub amount: Amount,
}

pub struct BidLedger {
    storage: Arc<dyn AuctionStorage>,
    sealer: Arc<Sealer>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    notifier: Notifier,
}

impl BidLedger {
    pub fn new(
        storage: Arc<dyn AuctionStorage>,
        sealer: Arc<Sealer>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
        notifier: Notifier,
    ) -> Self {
        Self {
            storage,
            sealer,
            clock,
            config,
            notifier,
        }
    }

    /// Place a sealed bid. A second bid on the same item replaces the first.
    #[instrument(skip(self, actor, request), fields(round_id = %request.round_id, bidder = %request.bidder_id))]
    pub async fn submit(
        &self,
        actor: &Actor,
        request: BidRequest,
    ) -> EngineResult<Outcome<BidView>> {
        self.write(actor, request, BidWriteMode::Submit).await
    }

    /// Replace the sealed amount of an existing bid on the same item.
    #[instrument(skip(self, actor, request), fields(round_id = %request.round_id, bid_id = %bid_id))]
    pub async fn revise(
        &self,
        actor: &Actor,
        bid_id: BidId,
        request: BidRequest,
    ) -> EngineResult<Outcome<BidView>> {
        self.write(actor, request, BidWriteMode::Revise { bid_id })
            .await
    }

    async fn write(
        &self,
        actor: &Actor,
        request: BidRequest,
        mode: BidWriteMode,
    ) -> EngineResult<Outcome<BidView>> {
        if !actor.acts_for(&request.bidder_id) {
            return Ok(Outcome::rejected(
                ReasonCode::Unauthorized,
                "bids may only be placed by the bidder",
                None,
            ));
        }
        let Some(round) = self.storage.get_round(&request.round_id).await? else {
            return Ok(Outcome::rejected(
                ReasonCode::UnknownRound,
                format!("{} does not exist", request.round_id),
                None,
            ));
        };
        if let Some(rejection) = self.validate(&round, &request) {
            return Ok(rejection);
        }

        let now = self.clock.now();
        let sealed_payload = self
            .sealer
            .seal(&round.id, &request.item_id, request.amount)?;
        let write = self
            .storage
            .upsert_sealed_bid(SealedBidWrite {
                round_id: round.id.clone(),
                bidder_id: request.bidder_id.clone(),
                item_tag: self.sealer.item_tag(&round.id, &request.item_id),
                sealed_payload,
                mode,
                at: now,
            })
            .await?;

        match write {
            BidWrite::Inserted(bid) => {
                debug!(bid_id = %bid.id, "Sealed bid accepted");
                self.notifier
                    .emit(
                        actor,
                        AuctionEvent::BidAccepted {
                            round_id: bid.round_id.clone(),
                            bid_id: bid.id.clone(),
                            bidder_id: bid.bidder_id.clone(),
                        },
                        now,
                    )
                    .await;
                Ok(Outcome::accepted(BidView::from(&bid)))
            }
            BidWrite::Replaced(bid) => {
                debug!(bid_id = %bid.id, "Sealed bid replaced");
                self.notifier
                    .emit(
                        actor,
                        AuctionEvent::BidReplaced {
                            round_id: bid.round_id.clone(),
                            bid_id: bid.id.clone(),
                            bidder_id: bid.bidder_id.clone(),
                        },
                        now,
                    )
                    .await;
                Ok(Outcome::replaced(BidView::from(&bid)))
            }
            BidWrite::Rejected(code) => Ok(Outcome::rejected(
                code,
                rejection_detail(code, &round),
                None,
            )),
        }
    }

    fn validate(&self, round: &Round, request: &BidRequest) -> Option<Outcome<BidView>> {
        if !round.in_scope(&request.item_id) {
            return Some(Outcome::rejected(
                ReasonCode::UnknownItem,
                format!("{} is not offered in {}", request.item_id, round.id),
                None,
            ));
        }
        if request.amount < self.config.min_bid_amount {
            return Some(Outcome::rejected(
                ReasonCode::AmountBelowFloor,
                format!("minimum bid is {}", self.config.min_bid_amount),
                None,
            ));
        }
        if !round.accepts_bids_at(self.clock.now()) {
            return Some(Outcome::rejected(
                ReasonCode::RoundNotActive,
                rejection_detail(ReasonCode::RoundNotActive, round),
                None,
            ));
        }
        None
    }

    /// Remove an active sealed bid while the round is open.
    #[instrument(skip(self, actor), fields(round_id = %round_id, bid_id = %bid_id))]
    pub async fn withdraw(
        &self,
        actor: &Actor,
        round_id: &RoundId,
        bidder_id: &BidderId,
        bid_id: &BidId,
    ) -> EngineResult<Outcome<BidView>> {
        if !actor.acts_for(bidder_id) {
            return Ok(Outcome::rejected(
                ReasonCode::Unauthorized,
                "bids may only be withdrawn by the bidder",
                None,
            ));
        }
        if self.storage.get_round(round_id).await?.is_none() {
            return Ok(Outcome::rejected(
                ReasonCode::UnknownRound,
                format!("{} does not exist", round_id),
                None,
            ));
        }

        let now = self.clock.now();
        match self
            .storage
            .withdraw_bid(round_id, bidder_id, bid_id, now)
            .await?
        {
            BidRemoval::Removed(bid) => {
                self.notifier
                    .emit(
                        actor,
                        AuctionEvent::BidWithdrawn {
                            round_id: bid.round_id.clone(),
                            bid_id: bid.id.clone(),
                            bidder_id: bid.bidder_id.clone(),
                        },
                        now,
                    )
                    .await;
                Ok(Outcome::accepted(BidView::from(&bid)))
            }
            BidRemoval::Rejected(code) => Ok(Outcome::rejected(
                code,
                format!("{} cannot be withdrawn", bid_id),
                None,
            )),
        }
    }

    /// Reveal a closed round's bids. Repeated calls return the stored
    /// plaintext without decrypting again.
    ///
    /// A payload that fails authentication aborts the reveal.
    #[instrument(skip(self, actor), fields(round_id = %round.id))]
    pub async fn reveal(&self, actor: &Actor, round: &Round) -> EngineResult<Vec<Bid>> {
        if round.is_revealed() {
            return Ok(self.storage.list_round_bids(&round.id).await?);
        }

        let sealed = self.storage.list_round_bids(&round.id).await?;
        let mut reveals = Vec::with_capacity(sealed.len());
        for bid in &sealed {
            let (item_id, amount) = self.sealer.open(&round.id, &bid.sealed_payload)?;
            reveals.push(BidReveal {
                bid_id: bid.id.clone(),
                item_id,
                amount,
            });
        }

        let now = self.clock.now();
        match self.storage.reveal_bids(&round.id, reveals, now).await? {
            RevealOutcome::Revealed(bids) => {
                info!(count = bids.len(), "Bids revealed");
                self.notifier
                    .emit(
                        actor,
                        AuctionEvent::BidsRevealed {
                            round_id: round.id.clone(),
                            count: bids.len(),
                        },
                        now,
                    )
                    .await;
                Ok(bids)
            }
            RevealOutcome::AlreadyRevealed(bids) => Ok(bids),
        }
    }

    /// Plaintext copies of a closed round's bids, decrypted in memory only.
    /// Nothing is written, so the round stays unrevealed.
    pub async fn unsealed(&self, round: &Round) -> EngineResult<Vec<Bid>> {
        let mut bids = self.storage.list_round_bids(&round.id).await?;
        if round.is_revealed() {
            return Ok(bids);
        }
        for bid in &mut bids {
            let (item_id, amount) = self.sealer.open(&round.id, &bid.sealed_payload)?;
            bid.item_id = Some(item_id);
            bid.revealed_amount = Some(amount);
        }
        Ok(bids)
    }

    /// The bidder's own bids; item and amount stay hidden until reveal.
    pub async fn bids_for_bidder(
        &self,
        round_id: &RoundId,
        bidder_id: &BidderId,
    ) -> EngineResult<Vec<BidView>> {
        Ok(self
            .storage
            .list_bidder_bids(round_id, bidder_id)
            .await?
            .iter()
            .map(BidView::from)
            .collect())
    }
}

fn rejection_detail(code: ReasonCode, round: &Round) -> String {
    match code {
        ReasonCode::RoundNotActive => format!(
            "{} is {} and accepts bids from {} until {}",
            round.id, round.status, round.opens_at, round.closes_at
        ),
        ReasonCode::BidCapReached => format!(
            "at most {} active bids per bidder in {}",
            round.max_bids_per_bidder, round.id
        ),
        ReasonCode::UnknownBid => "no matching active bid for this item".to_string(),
        other => format!("{:?}", other),
    }
}
