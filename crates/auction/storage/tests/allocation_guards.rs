use auction_storage::{
    AccountStore, AllocationCommit, AllocationStore, BidReveal, BidStore, BidWrite, BidWriteMode,
    CommitOutcome, ExclusionWrite, InMemoryAuctionStorage, RevealOutcome, RoundStore,
    SealedBidWrite,
};
use auction_types::{
    Allocation, AllocationSource, BidStatus, BidderAccount, BidderId, ExclusionReason,
    FinalizationMode, ItemExclusion, ItemId, ItemScope, NewRound, ReasonCode, Round, RoundMode,
    RoundStatus, SealedPayload, SeriesId,
};
use chrono::{Duration, Utc};

fn new_round(item: &str) -> Round {
    let now = Utc::now();
    Round::from_request(
        NewRound {
            series_id: SeriesId::new("league"),
            round_number: 3,
            mode: RoundMode::Single,
            item_scope: ItemScope::Single {
                item_id: ItemId::new(item),
            },
            opens_at: now - Duration::minutes(5),
            closes_at: now + Duration::minutes(5),
            max_bids_per_bidder: 2,
            finalization_mode: FinalizationMode::Auto,
            tiebreak_kind: None,
        },
        now,
    )
}

/// Inserts one bid per bidder, closes the round and reveals `amounts`.
async fn revealed_round(
    storage: &InMemoryAuctionStorage,
    item: &str,
    amounts: &[(&str, u64)],
) -> (Round, Vec<auction_types::Bid>) {
    let round = new_round(item);
    storage.insert_round(round.clone()).await.unwrap();

    let mut reveals = Vec::new();
    for (bidder, amount) in amounts {
        let write = storage
            .upsert_sealed_bid(SealedBidWrite {
                round_id: round.id.clone(),
                bidder_id: BidderId::new(*bidder),
                item_tag: format!("tag-{item}"),
                sealed_payload: SealedPayload {
                    nonce: [7; 16],
                    ciphertext: vec![0; 8],
                    mac: [0; 32],
                },
                mode: BidWriteMode::Submit,
                at: Utc::now(),
            })
            .await
            .unwrap();
        let BidWrite::Inserted(bid) = write else {
            panic!("expected insert, got {write:?}");
        };
        reveals.push(BidReveal {
            bid_id: bid.id,
            item_id: ItemId::new(item),
            amount: *amount,
        });
        storage
            .seed_account(BidderAccount::new(BidderId::new(*bidder), 500, Utc::now()))
            .await
            .unwrap();
    }

    storage
        .transition_round(&round.id, &[RoundStatus::Active], RoundStatus::Finalizing, Utc::now())
        .await
        .unwrap();
    let bids = storage
        .reveal_bids(&round.id, reveals, Utc::now())
        .await
        .unwrap()
        .into_bids();
    (round, bids)
}

fn commit_for(round: &Round, bid: &auction_types::Bid, floor: u64) -> AllocationCommit {
    AllocationCommit {
        allocation: Allocation {
            item_id: bid.item_id.clone().unwrap(),
            bidder_id: bid.bidder_id.clone(),
            price: bid.revealed_amount.unwrap(),
            round_id: round.id.clone(),
            bid_id: bid.id.clone(),
            source: AllocationSource::Direct,
            acquired_at: Utc::now(),
        },
        reserve_floor: floor,
        max_items: 10,
    }
}

#[tokio::test]
async fn reveal_is_idempotent() {
    let storage = InMemoryAuctionStorage::new();
    let (round, bids) = revealed_round(&storage, "p1", &[("a", 100), ("b", 80)]).await;
    assert_eq!(bids.len(), 2);

    let again = storage
        .reveal_bids(&round.id, Vec::new(), Utc::now())
        .await
        .unwrap();
    assert!(matches!(again, RevealOutcome::AlreadyRevealed(_)));
    assert_eq!(again.bids(), bids.as_slice());
}

#[tokio::test]
async fn commit_marks_winner_and_losers_in_one_step() {
    let storage = InMemoryAuctionStorage::new();
    let (round, bids) = revealed_round(&storage, "p1", &[("a", 100), ("b", 80)]).await;
    let winner = bids.iter().find(|b| b.revealed_amount == Some(100)).unwrap();

    let outcome = storage
        .commit_allocation(commit_for(&round, winner, 100))
        .await
        .unwrap();
    let CommitOutcome::Committed { account, .. } = outcome else {
        panic!("expected commit");
    };
    assert_eq!(account.balance, 400);
    assert_eq!(account.items_acquired, 1);

    let stored = storage.list_round_bids(&round.id).await.unwrap();
    for bid in stored {
        let expected = if bid.id == winner.id {
            BidStatus::Won
        } else {
            BidStatus::Lost
        };
        assert_eq!(bid.status, expected);
    }
}

#[tokio::test]
async fn allocation_held_by_another_round_is_refused() {
    let storage = InMemoryAuctionStorage::new();
    let (first_round, first_bids) = revealed_round(&storage, "p1", &[("a", 100)]).await;
    let (second_round, second_bids) = revealed_round(&storage, "p1", &[("b", 120)]).await;

    storage
        .commit_allocation(commit_for(&first_round, &first_bids[0], 0))
        .await
        .unwrap();
    let duplicate = storage
        .commit_allocation(commit_for(&second_round, &second_bids[0], 0))
        .await
        .unwrap();

    let CommitOutcome::HeldElsewhere(owner) = duplicate else {
        panic!("expected the item to be held elsewhere, got {duplicate:?}");
    };
    assert_eq!(owner.round_id, first_round.id);
    let account = storage
        .get_account(&BidderId::new("b"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(account.balance, 500);
}

#[tokio::test]
async fn repeated_commit_in_the_same_round_reports_the_existing_allocation() {
    let storage = InMemoryAuctionStorage::new();
    let (round, bids) = revealed_round(&storage, "p1", &[("a", 100), ("b", 80)]).await;
    let winner = bids.iter().find(|b| b.revealed_amount == Some(100)).unwrap();
    let runner_up = bids.iter().find(|b| b.revealed_amount == Some(80)).unwrap();

    storage
        .commit_allocation(commit_for(&round, winner, 0))
        .await
        .unwrap();
    let again = storage
        .commit_allocation(commit_for(&round, runner_up, 0))
        .await
        .unwrap();

    let CommitOutcome::AlreadyAllocated(existing) = again else {
        panic!("expected the existing allocation, got {again:?}");
    };
    assert_eq!(existing.bidder_id, BidderId::new("a"));
    let account = storage
        .get_account(&BidderId::new("b"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(account.balance, 500);
}

#[tokio::test]
async fn exclusion_and_allocation_never_both_land() {
    let storage = InMemoryAuctionStorage::new();
    let (round, bids) = revealed_round(&storage, "p1", &[("a", 100)]).await;
    storage
        .commit_allocation(commit_for(&round, &bids[0], 0))
        .await
        .unwrap();

    let write = storage
        .record_exclusion(ItemExclusion {
            round_id: round.id.clone(),
            item_id: ItemId::new("p1"),
            reason: ExclusionReason::NoQualifyingBids,
            recorded_at: Utc::now(),
        })
        .await
        .unwrap();
    assert!(matches!(write, ExclusionWrite::Allocated(_)));
    assert!(storage
        .list_round_exclusions(&round.id)
        .await
        .unwrap()
        .is_empty());

    let (other, other_bids) = revealed_round(&storage, "p2", &[("b", 90)]).await;
    storage
        .record_exclusion(ItemExclusion {
            round_id: other.id.clone(),
            item_id: ItemId::new("p2"),
            reason: ExclusionReason::NoQualifyingBids,
            recorded_at: Utc::now(),
        })
        .await
        .unwrap();
    let late = storage
        .commit_allocation(commit_for(&other, &other_bids[0], 0))
        .await
        .unwrap();
    assert!(matches!(late, CommitOutcome::AlreadyExcluded(_)));
}

#[tokio::test]
async fn budget_rejection_leaves_no_trace() {
    let storage = InMemoryAuctionStorage::new();
    let (round, bids) = revealed_round(&storage, "p1", &[("a", 450)]).await;

    let outcome = storage
        .commit_allocation(commit_for(&round, &bids[0], 100))
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        CommitOutcome::BudgetRejected {
            code: ReasonCode::ReserveBreach,
            ..
        }
    ));
    assert!(storage
        .get_allocation(&ItemId::new("p1"))
        .await
        .unwrap()
        .is_none());
    let account = storage
        .get_account(&BidderId::new("a"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(account.balance, 500);
}

#[tokio::test]
async fn exclusion_is_idempotent_and_marks_bids_lost() {
    let storage = InMemoryAuctionStorage::new();
    let (round, _) = revealed_round(&storage, "p1", &[("a", 100)]).await;
    let exclusion = ItemExclusion {
        round_id: round.id.clone(),
        item_id: ItemId::new("p1"),
        reason: ExclusionReason::NoQualifyingBids,
        recorded_at: Utc::now(),
    };

    let first = storage.record_exclusion(exclusion.clone()).await.unwrap();
    let second = storage.record_exclusion(exclusion).await.unwrap();

    assert!(matches!(first, ExclusionWrite::Recorded(_)));
    assert!(matches!(second, ExclusionWrite::Existing(_)));
    let bids = storage.list_round_bids(&round.id).await.unwrap();
    assert!(bids.iter().all(|bid| bid.status == BidStatus::Lost));
}
