//! End-to-end round scenarios over the in-memory backend.

mod support;

use auction_engine::{ItemPlan, ReconcileReport, ReserveDecision};
use auction_storage::QueryWindow;
use auction_storage::TiebreakerStore;
use auction_types::{
    Actor, AllocationSource, ExclusionReason, FinalizationMode, ItemScope, NewRound, OutcomeTag,
    PhaseBoundary, PhasePolicy, ReasonCode, ResolveMode, RoundMode, RoundStatus, SeriesId,
    TiebreakResolution,
};
use chrono::Duration;
use support::{bidder, item, Harness};

fn reserve_policy() -> PhasePolicy {
    PhasePolicy {
        series_id: SeriesId::new("league"),
        phases: vec![PhaseBoundary {
            end_round_number: 10,
            min_reserve_balance: 100,
        }],
        terminal_reserve: 0,
        max_items_per_bidder: 3,
    }
}

#[tokio::test]
async fn test_fixed_window_revision_beats_silent_bidder() {
    let h = Harness::new(1_000);
    let round = h
        .round(RoundMode::Single, &["p1"], FinalizationMode::Auto)
        .await;
    h.bid(&round, "a", "p1", 100).await;
    h.bid(&round, "b", "p1", 100).await;
    h.bid(&round, "c", "p1", 80).await;

    let closed = h.close(&round).await;
    assert!(closed.is_accepted());
    assert_eq!(closed.state.unwrap().status, RoundStatus::Tiebreaker);

    let tb = h.only_tiebreaker(&round).await;
    let window = tb.as_fixed().unwrap();
    assert_eq!(window.tied_amount, 100);
    let mut tied = window
        .participants
        .iter()
        .map(|p| p.bidder_id.as_str().to_string())
        .collect::<Vec<_>>();
    tied.sort();
    assert_eq!(tied, vec!["a", "b"]);

    let revision = h
        .engine
        .submit_revision(&Actor::bidder(bidder("a")), tb.id(), &bidder("a"), 150)
        .await
        .unwrap();
    assert!(revision.is_accepted());
    let state = revision.state.unwrap();
    let hidden = state.as_fixed().unwrap().participant(&bidder("a")).unwrap();
    assert!(hidden.has_submitted);
    assert_eq!(hidden.revised_amount, None);

    let resolved = h
        .engine
        .resolve_tiebreaker(&Actor::admin(), tb.id(), ResolveMode::Auto)
        .await
        .unwrap();
    assert!(resolved.is_accepted());
    match resolved.state.unwrap().resolution() {
        Some(TiebreakResolution::Winner {
            bidder_id, amount, ..
        }) => {
            assert_eq!(bidder_id, &bidder("a"));
            assert_eq!(*amount, 150);
        }
        other => panic!("unexpected resolution {other:?}"),
    }

    let detail = h.engine.round_detail(&round.id).await.unwrap().unwrap();
    assert_eq!(detail.round.status, RoundStatus::Completed);
    assert_eq!(detail.allocation_count, 1);
    let allocation = &detail.allocations[0];
    assert_eq!(allocation.bidder_id, bidder("a"));
    assert_eq!(allocation.price, 150);
    assert!(matches!(
        allocation.source,
        AllocationSource::FixedWindow { .. }
    ));
    assert_eq!(h.engine.account(&bidder("a")).await.unwrap().balance, 850);
}

#[tokio::test]
async fn test_continuous_raises_close_on_highest() {
    let h = Harness::new(1_000);
    let round = h
        .round(RoundMode::Bulk, &["p1"], FinalizationMode::Auto)
        .await;
    for who in ["x", "y", "z"] {
        h.bid(&round, who, "p1", 100).await;
    }
    h.close(&round).await;

    let tb = h.only_tiebreaker(&round).await;
    assert_eq!(tb.as_continuous().unwrap().opening_amount, 100);

    let raise = |who: &'static str, amount| {
        let engine = h.engine.clone();
        let id = tb.id().clone();
        async move {
            engine
                .raise(&Actor::bidder(bidder(who)), &id, &bidder(who), amount)
                .await
                .unwrap()
        }
    };
    assert!(raise("x", 120).await.is_accepted());
    assert!(raise("y", 130).await.is_accepted());
    assert_eq!(
        raise("z", 125).await.code(),
        Some(ReasonCode::BelowCurrentHigh)
    );

    let closed = h
        .engine
        .close_tiebreaker(&Actor::admin(), tb.id())
        .await
        .unwrap();
    assert!(closed.is_accepted());

    let detail = h.engine.round_detail(&round.id).await.unwrap().unwrap();
    assert_eq!(detail.round.status, RoundStatus::Completed);
    let allocation = &detail.allocations[0];
    assert_eq!(allocation.bidder_id, bidder("y"));
    assert_eq!(allocation.price, 130);
    assert!(matches!(
        allocation.source,
        AllocationSource::Continuous { .. }
    ));
}

#[tokio::test]
async fn test_idle_continuous_auction_closes_from_poller() {
    let h = Harness::new(1_000);
    let round = h
        .round(RoundMode::Bulk, &["p1"], FinalizationMode::Auto)
        .await;
    h.bid(&round, "x", "p1", 100).await;
    h.bid(&round, "y", "p1", 100).await;
    h.close(&round).await;
    let tb = h.only_tiebreaker(&round).await;

    h.engine
        .raise(&Actor::bidder(bidder("x")), tb.id(), &bidder("x"), 110)
        .await
        .unwrap();

    h.clock.advance(Duration::seconds(200));
    let early = h.engine.poll_deadlines(h.engine.now()).await.unwrap();
    assert!(early.tiebreakers_resolved.is_empty());

    h.clock.advance(Duration::seconds(200));
    let report = h.engine.poll_deadlines(h.engine.now()).await.unwrap();
    assert_eq!(report.tiebreakers_resolved, vec![tb.id().clone()]);
    assert_eq!(report.completed, vec![round.id.clone()]);
    assert_eq!(report.failures, 0);

    let detail = h.engine.round_detail(&round.id).await.unwrap().unwrap();
    assert_eq!(detail.allocations[0].bidder_id, bidder("x"));
    assert_eq!(detail.allocations[0].price, 110);
}

#[tokio::test]
async fn test_last_participant_standing_wins_at_current_high() {
    let h = Harness::new(1_000);
    let round = h
        .round(RoundMode::Bulk, &["p1"], FinalizationMode::Auto)
        .await;
    h.bid(&round, "x", "p1", 100).await;
    h.bid(&round, "y", "p1", 100).await;
    h.close(&round).await;
    let tb = h.only_tiebreaker(&round).await;

    let left = h
        .engine
        .withdraw_from_tiebreaker(&Actor::bidder(bidder("x")), tb.id(), &bidder("x"))
        .await
        .unwrap();
    assert!(left.is_accepted());

    let detail = h.engine.round_detail(&round.id).await.unwrap().unwrap();
    assert_eq!(detail.round.status, RoundStatus::Completed);
    assert_eq!(detail.allocations[0].bidder_id, bidder("y"));
    assert_eq!(detail.allocations[0].price, 100);
}

#[tokio::test]
async fn test_reserve_breach_passes_item_to_next_bidder() {
    let h = Harness::new(500);
    let policy = h
        .engine
        .register_policy(&Actor::admin(), reserve_policy())
        .await
        .unwrap();
    assert!(policy.is_accepted());

    let round = h
        .round(RoundMode::Single, &["p1"], FinalizationMode::Manual)
        .await;
    h.bid(&round, "a", "p1", 450).await;
    h.bid(&round, "b", "p1", 300).await;

    let closed = h.close(&round).await;
    assert_eq!(closed.state.unwrap().status, RoundStatus::Finalizing);

    let preview = h
        .engine
        .preview(&Actor::admin(), &round.id)
        .await
        .unwrap()
        .state
        .unwrap();
    assert_eq!(
        preview.plan_for(&item("p1")),
        Some(&ItemPlan::Allocate {
            item_id: item("p1"),
            bidder_id: bidder("b"),
            price: 300,
            source: AllocationSource::Direct,
        })
    );
    assert_eq!(preview.disqualified.len(), 1);
    assert_eq!(preview.disqualified[0].bidder_id, bidder("a"));
    assert_eq!(
        preview.disqualified[0].decision,
        ReserveDecision::ReserveBreach {
            required: 100,
            remaining: 50
        }
    );

    // Preview writes nothing.
    let untouched = h.engine.round_detail(&round.id).await.unwrap().unwrap();
    assert_eq!(untouched.allocation_count, 0);
    assert!(untouched.round.revealed_at.is_none());

    let finalized = h
        .engine
        .finalize_round(&Actor::admin(), &round.id)
        .await
        .unwrap();
    assert!(finalized.is_accepted());
    let finalization = finalized.state.unwrap();
    assert_eq!(finalization.round.status, RoundStatus::Completed);
    assert_eq!(finalization.reconcile, Some(ReconcileReport::Completed));

    assert_eq!(h.engine.account(&bidder("a")).await.unwrap().balance, 500);
    assert_eq!(h.engine.account(&bidder("b")).await.unwrap().balance, 200);
}

#[tokio::test]
async fn test_sealed_bid_exposes_nothing_before_reveal() {
    let h = Harness::new(1_000);
    let round = h
        .round(RoundMode::Bulk, &["p1", "p2"], FinalizationMode::Manual)
        .await;

    let placed = h.bid(&round, "a", "p2", 987_654_321).await;
    assert!(matches!(placed.tag, OutcomeTag::Accepted));
    let view = placed.state.unwrap();
    assert!(view.sealed);
    assert_eq!(view.amount, None);
    assert_eq!(view.item_id, None);

    let replaced = h.bid(&round, "a", "p2", 200).await;
    assert!(matches!(replaced.tag, OutcomeTag::Replaced));

    let mine = h
        .engine
        .bids_for_bidder(&round.id, &bidder("a"))
        .await
        .unwrap();
    assert_eq!(mine.len(), 1);
    assert!(mine[0].amount.is_none());

    let audit = h
        .engine
        .audit_log(QueryWindow {
            limit: 1_000,
            offset: 0,
        })
        .await
        .unwrap();
    let dump = serde_json::to_string(&audit).unwrap();
    assert!(!dump.contains("987654321"));
}

#[tokio::test]
async fn test_reveal_happens_once() {
    let h = Harness::new(1_000);
    let round = h
        .round(RoundMode::Single, &["p1"], FinalizationMode::Manual)
        .await;
    h.bid(&round, "a", "p1", 100).await;
    h.bid(&round, "b", "p1", 100).await;
    h.close(&round).await;

    let first = h
        .engine
        .finalize_round(&Actor::admin(), &round.id)
        .await
        .unwrap()
        .state
        .unwrap();
    assert_eq!(first.round.status, RoundStatus::Tiebreaker);
    let revealed_at = h
        .engine
        .round_detail(&round.id)
        .await
        .unwrap()
        .unwrap()
        .round
        .revealed_at;
    assert!(revealed_at.is_some());

    h.clock.advance(Duration::minutes(1));
    let second = h
        .engine
        .finalize_round(&Actor::admin(), &round.id)
        .await
        .unwrap()
        .state
        .unwrap();
    assert!(matches!(
        second.report.unwrap().plan_for(&item("p1")),
        Some(ItemPlan::AwaitingTiebreaker { .. })
    ));
    let detail = h.engine.round_detail(&round.id).await.unwrap().unwrap();
    assert_eq!(detail.round.revealed_at, revealed_at);
    assert_eq!(detail.tiebreakers.len(), 1);

    let audit = h
        .engine
        .audit_log(QueryWindow {
            limit: 1_000,
            offset: 0,
        })
        .await
        .unwrap();
    let reveals = audit
        .iter()
        .filter(|record| record.stage == "bids_revealed")
        .count();
    assert_eq!(reveals, 1);
}

#[tokio::test]
async fn test_reconcile_refuses_unresolved_item() {
    let h = Harness::new(1_000);
    let round = h
        .round(RoundMode::Single, &["p1"], FinalizationMode::Manual)
        .await;
    h.bid(&round, "a", "p1", 100).await;
    h.close(&round).await;

    let outcome = h
        .engine
        .reconcile(&Actor::admin(), &round.id)
        .await
        .unwrap();
    assert!(outcome.is_no_op());
    let reconciliation = outcome.state.unwrap();
    assert_eq!(reconciliation.round.status, RoundStatus::Finalizing);
    assert_eq!(
        reconciliation.report,
        ReconcileReport::Unresolved {
            items: vec![item("p1")]
        }
    );

    h.engine
        .finalize_round(&Actor::admin(), &round.id)
        .await
        .unwrap();
    let after = h
        .engine
        .reconcile(&Actor::admin(), &round.id)
        .await
        .unwrap();
    assert!(after.is_no_op());
    let after = after.state.unwrap();
    assert_eq!(after.round.status, RoundStatus::Completed);
    assert_eq!(after.report, ReconcileReport::Completed);
}

#[tokio::test]
async fn test_unanswered_window_excludes_item() {
    let h = Harness::new(1_000);
    let round = h
        .round(RoundMode::Single, &["p1"], FinalizationMode::Auto)
        .await;
    h.bid(&round, "a", "p1", 100).await;
    h.bid(&round, "b", "p1", 100).await;
    h.close(&round).await;
    let tb = h.only_tiebreaker(&round).await;

    h.clock.advance(Duration::minutes(61));
    let report = h.engine.poll_deadlines(h.engine.now()).await.unwrap();
    assert_eq!(report.tiebreakers_resolved, vec![tb.id().clone()]);
    assert_eq!(report.completed, vec![round.id.clone()]);

    let detail = h.engine.round_detail(&round.id).await.unwrap().unwrap();
    assert_eq!(detail.allocation_count, 0);
    assert_eq!(detail.exclusions.len(), 1);
    assert_eq!(
        detail.exclusions[0].reason,
        ExclusionReason::TiebreakerUnanswered
    );
}

#[tokio::test]
async fn test_poller_closes_bulk_round_and_excludes_empty_items() {
    let h = Harness::new(1_000);
    let round = h
        .round(RoundMode::Bulk, &["p1", "p2"], FinalizationMode::Auto)
        .await;
    h.bid(&round, "a", "p1", 200).await;

    h.clock.advance(Duration::minutes(10));
    let quiet = h.engine.poll_deadlines(h.engine.now()).await.unwrap();
    assert!(quiet.is_idle());

    h.clock.advance(Duration::minutes(25));
    let report = h.engine.poll_deadlines(h.engine.now()).await.unwrap();
    assert_eq!(report.closed, vec![round.id.clone()]);

    let detail = h.engine.round_detail(&round.id).await.unwrap().unwrap();
    assert_eq!(detail.round.status, RoundStatus::Completed);
    assert_eq!(detail.allocations[0].item_id, item("p1"));
    assert_eq!(detail.exclusions[0].item_id, item("p2"));
    assert_eq!(detail.exclusions[0].reason, ExclusionReason::NoBids);
}

#[tokio::test]
async fn test_bidders_cannot_act_as_operators_or_for_others() {
    let h = Harness::new(1_000);
    let round = h
        .round(RoundMode::Single, &["p1"], FinalizationMode::Auto)
        .await;

    let closed = h
        .engine
        .close_round(&Actor::bidder(bidder("a")), &round.id)
        .await
        .unwrap();
    assert_eq!(closed.code(), Some(ReasonCode::Unauthorized));

    let forged = h
        .engine
        .submit_bid(
            &Actor::bidder(bidder("a")),
            auction_engine::BidRequest {
                round_id: round.id.clone(),
                bidder_id: bidder("b"),
                item_id: item("p1"),
                amount: 100,
            },
        )
        .await
        .unwrap();
    assert_eq!(forged.code(), Some(ReasonCode::Unauthorized));

    let outside = h.bid(&round, "a", "p9", 100).await;
    assert_eq!(outside.code(), Some(ReasonCode::UnknownItem));
    let cheap = h.bid(&round, "a", "p1", 1).await;
    assert_eq!(cheap.code(), Some(ReasonCode::AmountBelowFloor));
}

#[tokio::test]
async fn test_cancelled_round_refuses_bids_and_closure() {
    let h = Harness::new(1_000);
    let round = h
        .round(RoundMode::Single, &["p1"], FinalizationMode::Auto)
        .await;
    let cancelled = h
        .engine
        .cancel_round(&Actor::admin(), &round.id)
        .await
        .unwrap();
    assert!(cancelled.is_accepted());

    let again = h
        .engine
        .cancel_round(&Actor::admin(), &round.id)
        .await
        .unwrap();
    assert!(again.is_no_op());

    let late = h.bid(&round, "a", "p1", 100).await;
    assert_eq!(late.code(), Some(ReasonCode::RoundNotActive));
    assert!(h.close(&round).await.is_no_op());
}

#[tokio::test]
async fn test_unaffordable_tie_falls_through_to_lower_bid() {
    let h = Harness::new(1_000);
    let round = h
        .round(RoundMode::Single, &["p1"], FinalizationMode::Auto)
        .await;
    h.bid(&round, "a", "p1", 100).await;
    h.bid(&round, "b", "p1", 100).await;
    h.bid(&round, "c", "p1", 80).await;
    h.close(&round).await;
    let tb = h.only_tiebreaker(&round).await;

    let revision = h
        .engine
        .submit_revision(&Actor::bidder(bidder("a")), tb.id(), &bidder("a"), 100)
        .await
        .unwrap();
    assert!(revision.is_accepted());
    for who in ["a", "b"] {
        h.engine
            .set_balance(&Actor::admin(), &bidder(who), 50)
            .await
            .unwrap();
    }

    let resolved = h
        .engine
        .resolve_tiebreaker(&Actor::admin(), tb.id(), ResolveMode::Auto)
        .await
        .unwrap();
    assert!(resolved.is_accepted());

    let detail = h.engine.round_detail(&round.id).await.unwrap().unwrap();
    assert_eq!(detail.round.status, RoundStatus::Completed);
    assert!(detail.exclusions.is_empty());
    assert_eq!(detail.allocations[0].bidder_id, bidder("c"));
    assert_eq!(detail.allocations[0].price, 80);
    assert_eq!(detail.allocations[0].source, AllocationSource::Direct);
    assert_eq!(h.engine.account(&bidder("c")).await.unwrap().balance, 920);
}

#[tokio::test]
async fn test_lower_tier_tie_opens_a_second_tiebreaker() {
    let h = Harness::new(1_000);
    let round = h
        .round(RoundMode::Single, &["p1"], FinalizationMode::Auto)
        .await;
    for (who, amount) in [("a", 100), ("b", 100), ("c", 80), ("d", 80)] {
        h.bid(&round, who, "p1", amount).await;
    }
    h.close(&round).await;
    let first = h.only_tiebreaker(&round).await;

    h.engine
        .submit_revision(&Actor::bidder(bidder("b")), first.id(), &bidder("b"), 100)
        .await
        .unwrap();
    for who in ["a", "b"] {
        h.engine
            .set_balance(&Actor::admin(), &bidder(who), 10)
            .await
            .unwrap();
    }
    h.clock.advance(Duration::minutes(1));
    h.engine
        .resolve_tiebreaker(&Actor::admin(), first.id(), ResolveMode::Auto)
        .await
        .unwrap();

    let tiebreakers = h.engine.round_tiebreakers(&round.id).await.unwrap();
    assert_eq!(tiebreakers.len(), 2);
    assert!(!tiebreakers[0].is_active());
    let second = &tiebreakers[1];
    assert!(second.is_active());
    assert_eq!(second.tied_amount(), 80);

    let detail = h.engine.round_detail(&round.id).await.unwrap().unwrap();
    assert_eq!(detail.round.status, RoundStatus::Tiebreaker);
    assert_eq!(detail.allocation_count, 0);
    assert!(detail.exclusions.is_empty());
}

#[tokio::test]
async fn test_reconcile_settles_a_stranded_tiebreaker() {
    let h = Harness::new(1_000);
    let round = h
        .round(RoundMode::Single, &["p1"], FinalizationMode::Auto)
        .await;
    h.bid(&round, "a", "p1", 100).await;
    h.bid(&round, "b", "p1", 100).await;
    h.close(&round).await;
    let tb = h.only_tiebreaker(&round).await;
    h.engine
        .submit_revision(&Actor::bidder(bidder("a")), tb.id(), &bidder("a"), 120)
        .await
        .unwrap();

    // Resolution committed, settlement never ran.
    let bid_id = tb
        .as_fixed()
        .unwrap()
        .participant(&bidder("a"))
        .unwrap()
        .bid_id
        .clone();
    h.storage
        .resolve_tiebreaker(
            tb.id(),
            TiebreakResolution::Winner {
                bidder_id: bidder("a"),
                amount: 120,
                bid_id,
            },
            h.engine.now(),
        )
        .await
        .unwrap();
    let stranded = h.engine.round_detail(&round.id).await.unwrap().unwrap();
    assert_eq!(stranded.round.status, RoundStatus::Tiebreaker);
    assert_eq!(stranded.allocation_count, 0);

    let report = h.engine.poll_deadlines(h.engine.now()).await.unwrap();
    assert_eq!(report.completed, vec![round.id.clone()]);
    assert_eq!(report.failures, 0);

    let detail = h.engine.round_detail(&round.id).await.unwrap().unwrap();
    assert_eq!(detail.allocations[0].bidder_id, bidder("a"));
    assert_eq!(detail.allocations[0].price, 120);
    assert_eq!(h.engine.account(&bidder("a")).await.unwrap().balance, 880);
}

#[tokio::test]
async fn test_tiebreaker_for_an_item_taken_elsewhere_excludes_it() {
    let h = Harness::new(1_000);
    let first = h
        .round(RoundMode::Single, &["p1"], FinalizationMode::Auto)
        .await;
    h.bid(&first, "a", "p1", 100).await;
    h.bid(&first, "b", "p1", 100).await;
    h.close(&first).await;
    let tb = h.only_tiebreaker(&first).await;
    h.engine
        .submit_revision(&Actor::bidder(bidder("a")), tb.id(), &bidder("a"), 150)
        .await
        .unwrap();

    let opens_at = h.engine.now();
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
                closes_at: opens_at + Duration::minutes(10),
                max_bids_per_bidder: 5,
                finalization_mode: FinalizationMode::Auto,
                tiebreak_kind: None,
            },
        )
        .await
        .unwrap()
        .state
        .unwrap();
    h.bid(&second, "c", "p1", 90).await;
    h.clock.advance(Duration::minutes(11));
    h.engine
        .close_round(&Actor::admin(), &second.id)
        .await
        .unwrap();

    let resolved = h
        .engine
        .resolve_tiebreaker(&Actor::admin(), tb.id(), ResolveMode::Auto)
        .await
        .unwrap();
    assert!(resolved.is_accepted());

    let detail = h.engine.round_detail(&first.id).await.unwrap().unwrap();
    assert_eq!(detail.round.status, RoundStatus::Completed);
    assert_eq!(detail.allocation_count, 0);
    assert_eq!(detail.exclusions[0].reason, ExclusionReason::AlreadyAllocated);
    assert_eq!(h.engine.account(&bidder("a")).await.unwrap().balance, 1_000);

    let audit = h
        .engine
        .audit_log(QueryWindow {
            limit: 1_000,
            offset: 0,
        })
        .await
        .unwrap();
    assert!(audit
        .iter()
        .any(|record| record.stage == "invariant_violated"));
}
