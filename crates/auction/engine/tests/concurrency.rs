//! Racing writers against the same round and tiebreaker.

mod support;

use auction_types::{
    Actor, ExclusionReason, FinalizationMode, ItemScope, NewRound, OutcomeTag, ReasonCode,
    RoundMode, RoundStatus, SeriesId,
};
use chrono::Duration;
use support::{bidder, item, start, Harness};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_closes_apply_once() {
    let h = Harness::new(1_000);
    let round = h
        .round(RoundMode::Single, &["p1"], FinalizationMode::Manual)
        .await;
    h.bid(&round, "a", "p1", 100).await;
    h.clock.advance(Duration::minutes(31));

    let mut handles = Vec::new();
    for _ in 0..16 {
        let engine = h.engine.clone();
        let round_id = round.id.clone();
        handles.push(tokio::spawn(async move {
            engine.close_round(&Actor::admin(), &round_id).await
        }));
    }

    let mut accepted = 0;
    let mut no_ops = 0;
    for handle in handles {
        let outcome = handle.await.unwrap().unwrap();
        match outcome.tag {
            OutcomeTag::Accepted => accepted += 1,
            OutcomeTag::NoOp => no_ops += 1,
            other => panic!("unexpected outcome {other:?}"),
        }
    }
    assert_eq!(accepted, 1);
    assert_eq!(no_ops, 15);

    let audit = h
        .engine
        .audit_log(auction_storage::QueryWindow {
            limit: 1_000,
            offset: 0,
        })
        .await
        .unwrap();
    let closes = audit
        .iter()
        .filter(|record| record.stage == "round_closed")
        .count();
    assert_eq!(closes, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_equal_raises_race_to_one_winner() {
    let h = Harness::new(1_000);
    let round = h
        .round(RoundMode::Bulk, &["p1"], FinalizationMode::Auto)
        .await;
    for who in ["x", "y", "z"] {
        h.bid(&round, who, "p1", 100).await;
    }
    h.close(&round).await;
    let tb = h.only_tiebreaker(&round).await;

    let mut handles = Vec::new();
    for who in ["x", "y", "z"] {
        let engine = h.engine.clone();
        let id = tb.id().clone();
        handles.push(tokio::spawn(async move {
            engine
                .raise(&Actor::bidder(bidder(who)), &id, &bidder(who), 150)
                .await
        }));
    }

    let mut accepted = 0;
    for handle in handles {
        let outcome = handle.await.unwrap().unwrap();
        if outcome.is_accepted() {
            accepted += 1;
        } else {
            assert_eq!(outcome.code(), Some(ReasonCode::BelowCurrentHigh));
        }
    }
    assert_eq!(accepted, 1);

    let stored = h.engine.tiebreaker_detail(tb.id()).await.unwrap().unwrap();
    let auction = stored.as_continuous().unwrap();
    assert_eq!(auction.current_high_amount, 150);
    assert!(auction.current_high_bidder.is_some());
}

#[tokio::test]
async fn test_second_round_cannot_reallocate_an_item() {
    let h = Harness::new(1_000);
    let first = h
        .round(RoundMode::Single, &["p1"], FinalizationMode::Auto)
        .await;
    h.bid(&first, "a", "p1", 100).await;
    h.close(&first).await;

    let opens_at = start() + Duration::minutes(31);
    let second = h
        .engine
        .create_round(
            &Actor::admin(),
            NewRound {
                series_id: SeriesId::new("league"),
                round_number: 4,
                mode: RoundMode::Single,
                item_scope: ItemScope::Single {
                    item_id: item("p1"),
                },
                opens_at,
                closes_at: opens_at + Duration::minutes(30),
                max_bids_per_bidder: 5,
                finalization_mode: FinalizationMode::Auto,
                tiebreak_kind: None,
            },
        )
        .await
        .unwrap()
        .state
        .unwrap();
    assert!(h.bid(&second, "b", "p1", 200).await.is_accepted());

    h.clock.advance(Duration::minutes(31));
    let err = h
        .engine
        .close_round(&Actor::admin(), &second.id)
        .await
        .unwrap_err();
    assert!(err.is_invariant_violation(), "unexpected error {err}");

    let detail = h.engine.round_detail(&first.id).await.unwrap().unwrap();
    assert_eq!(detail.allocations[0].bidder_id, bidder("a"));
    assert_eq!(h.engine.account(&bidder("b")).await.unwrap().balance, 1_000);

    // The conflict closes the item out in the second round.
    let loser = h.engine.round_detail(&second.id).await.unwrap().unwrap();
    assert_eq!(loser.allocation_count, 0);
    assert_eq!(loser.exclusions.len(), 1);
    assert_eq!(loser.exclusions[0].reason, ExclusionReason::AlreadyAllocated);

    let reconciled = h
        .engine
        .reconcile(&Actor::admin(), &second.id)
        .await
        .unwrap()
        .state
        .unwrap();
    assert_eq!(reconciled.round.status, RoundStatus::Completed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_finalizes_allocate_each_item_once() {
    let h = Harness::new(1_000);
    let round = h
        .round(RoundMode::Bulk, &["p1", "p2", "p3", "p4"], FinalizationMode::Manual)
        .await;
    h.bid(&round, "a", "p1", 300).await;
    h.bid(&round, "b", "p1", 250).await;
    h.bid(&round, "b", "p2", 200).await;
    h.bid(&round, "c", "p3", 150).await;
    h.bid(&round, "d", "p4", 120).await;
    h.bid(&round, "a", "p4", 110).await;
    let closed = h.close(&round).await;
    assert_eq!(closed.state.unwrap().status, RoundStatus::Finalizing);

    let mut handles = Vec::new();
    for _ in 0..12 {
        let engine = h.engine.clone();
        let round_id = round.id.clone();
        handles.push(tokio::spawn(async move {
            engine.finalize_round(&Actor::admin(), &round_id).await
        }));
    }

    for handle in handles {
        let outcome = handle
            .await
            .unwrap()
            .unwrap_or_else(|err| panic!("finalize failed: {err}"));
        match &outcome.tag {
            OutcomeTag::Accepted | OutcomeTag::NoOp => {}
            OutcomeTag::Rejected(_) => {
                assert_eq!(outcome.code(), Some(ReasonCode::LostRace));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    let detail = h.engine.round_detail(&round.id).await.unwrap().unwrap();
    assert_eq!(detail.round.status, RoundStatus::Completed);
    assert!(detail.exclusions.is_empty());
    let mut owners = detail
        .allocations
        .iter()
        .map(|a| (a.item_id.as_str().to_string(), a.bidder_id.as_str().to_string()))
        .collect::<Vec<_>>();
    owners.sort();
    assert_eq!(
        owners,
        vec![
            ("p1".to_string(), "a".to_string()),
            ("p2".to_string(), "b".to_string()),
            ("p3".to_string(), "c".to_string()),
            ("p4".to_string(), "d".to_string()),
        ]
    );

    assert_eq!(h.engine.account(&bidder("a")).await.unwrap().balance, 700);
    assert_eq!(h.engine.account(&bidder("b")).await.unwrap().balance, 800);

    let audit = h
        .engine
        .audit_log(auction_storage::QueryWindow {
            limit: 1_000,
            offset: 0,
        })
        .await
        .unwrap();
    let stages = |stage: &str| audit.iter().filter(|record| record.stage == stage).count();
    assert_eq!(stages("item_allocated"), 4);
    assert_eq!(stages("invariant_violated"), 0);
}
