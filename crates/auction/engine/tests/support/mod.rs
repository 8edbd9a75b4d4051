#![allow(dead_code)]

use auction_engine::{
    AuctionEngine, BidRequest, EngineConfig, ManualClock, Sealer, StaticBalanceSource,
};
use auction_storage::{AuctionStorage, InMemoryAuctionStorage};
use auction_types::{
    Actor, Amount, BidView, BidderId, FinalizationMode, ItemId, ItemScope, NewRound, Outcome,
    Round, RoundMode, SeriesId, Tiebreaker,
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Arc;

pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

pub fn bidder(id: &str) -> BidderId {
    BidderId::new(id)
}

pub fn item(id: &str) -> ItemId {
    ItemId::new(id)
}

pub struct Harness {
    pub engine: Arc<AuctionEngine>,
    pub clock: Arc<ManualClock>,
    pub storage: Arc<InMemoryAuctionStorage>,
}

impl Harness {
    pub fn new(balance: Amount) -> Self {
        let clock = Arc::new(ManualClock::new(start()));
        let storage = Arc::new(InMemoryAuctionStorage::new());
        let shared: Arc<dyn AuctionStorage> = storage.clone();
        let engine = AuctionEngine::new(
            shared,
            Arc::new(StaticBalanceSource::new(balance)),
            clock.clone(),
            Sealer::from_passphrase("integration secret"),
            EngineConfig::default(),
        );
        Self {
            engine: Arc::new(engine),
            clock,
            storage,
        }
    }

    /// Round open from `start()` for thirty minutes.
    pub async fn round(&self, mode: RoundMode, items: &[&str], finalization: FinalizationMode) -> Round {
        let item_scope = match mode {
            RoundMode::Single => ItemScope::Single {
                item_id: item(items[0]),
            },
            RoundMode::Bulk => ItemScope::Category {
                category: "forwards".to_string(),
                items: items.iter().map(|id| item(id)).collect(),
            },
        };
        let outcome = self
            .engine
            .create_round(
                &Actor::admin(),
                NewRound {
                    series_id: SeriesId::new("league"),
                    round_number: 3,
                    mode,
                    item_scope,
                    opens_at: start(),
                    closes_at: start() + Duration::minutes(30),
                    max_bids_per_bidder: 5,
                    finalization_mode: finalization,
                    tiebreak_kind: None,
                },
            )
            .await
            .unwrap();
        assert!(outcome.is_accepted(), "round rejected: {outcome:?}");
        outcome.state.unwrap()
    }

    pub async fn bid(&self, round: &Round, who: &str, what: &str, amount: Amount) -> Outcome<BidView> {
        self.engine
            .submit_bid(
                &Actor::bidder(bidder(who)),
                BidRequest {
                    round_id: round.id.clone(),
                    bidder_id: bidder(who),
                    item_id: item(what),
                    amount,
                },
            )
            .await
            .unwrap()
    }

    /// Move past the round's deadline and close it as the admin.
    pub async fn close(&self, round: &Round) -> Outcome<Round> {
        self.clock.advance(Duration::minutes(31));
        self.engine
            .close_round(&Actor::admin(), &round.id)
            .await
            .unwrap()
    }

    pub async fn only_tiebreaker(&self, round: &Round) -> Tiebreaker {
        let mut tiebreakers = self.engine.round_tiebreakers(&round.id).await.unwrap();
        assert_eq!(tiebreakers.len(), 1, "expected one tiebreaker");
        tiebreakers.remove(0)
    }
}
