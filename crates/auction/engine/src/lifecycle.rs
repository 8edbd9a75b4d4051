//! Round lifecycle controller
//!
//! ```text
//! active ──close──▶ finalizing ──▶ tiebreaker ──▶ completed
//!    │                  │                              ▲
//!    └──────cancel──────┴──▶ cancelled      finalizing ┘
//! ```
//!
//! `active -> finalizing` is the only way into resolution and is a guarded
//! exactly-once transition. Completion is derived from the items
//! themselves: a round completes only once every item in scope has an
//! allocation or an exclusion.

use crate::bids::BidLedger;
use crate::clock::Clock;
use crate::error::EngineResult;
use crate::notify::Notifier;
use crate::resolver::{AllocationResolver, ResolutionReport};
use crate::tiebreaker::redact;
use auction_storage::{AuctionStorage, RoundTransition, StorageError};
use auction_types::{
    Actor, Allocation, AuctionEvent, FinalizationMode, ItemExclusion, ItemId, NewRound, Outcome,
    ReasonCode, Round, RoundId, RoundMode, RoundStatus, Tiebreaker, TiebreakerId,
};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// What the items of a round say about its status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReconcileReport {
    /// Every item is allocated or excluded
    Completed,
    /// Remaining items wait on these tiebreakers
    AwaitingTiebreakers { tiebreaker_ids: Vec<TiebreakerId> },
    /// Items with neither an outcome nor an active tiebreaker
    Unresolved { items: Vec<ItemId> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finalization {
    pub round: Round,
    pub report: Option<ResolutionReport>,
    pub reconcile: Option<ReconcileReport>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reconciliation {
    pub round: Round,
    pub report: ReconcileReport,
}

/// Public round projection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundDetail {
    pub round: Round,
    pub bid_count: usize,
    pub bidder_count: usize,
    pub allocation_count: usize,
    pub allocations: Vec<Allocation>,
    pub exclusions: Vec<ItemExclusion>,
    pub tiebreakers: Vec<Tiebreaker>,
}

pub struct RoundController {
    storage: Arc<dyn AuctionStorage>,
    bids: Arc<BidLedger>,
    resolver: Arc<AllocationResolver>,
    notifier: Notifier,
    clock: Arc<dyn Clock>,
}

impl RoundController {
    pub fn new(
        storage: Arc<dyn AuctionStorage>,
        bids: Arc<BidLedger>,
        resolver: Arc<AllocationResolver>,
        notifier: Notifier,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            storage,
            bids,
            resolver,
            notifier,
            clock,
        }
    }

    #[instrument(skip(self, actor, request), fields(series = %request.series_id, round_number = request.round_number))]
    pub async fn create_round(
        &self,
        actor: &Actor,
        request: NewRound,
    ) -> EngineResult<Outcome<Round>> {
        if !actor.is_operator() {
            return Ok(not_operator("create rounds"));
        }
        if request.closes_at <= request.opens_at {
            return Ok(Outcome::rejected(
                ReasonCode::InvalidWindow,
                "closes_at must be after opens_at",
                None,
            ));
        }
        let items = request.item_scope.items();
        let invalid = if items.is_empty() {
            Some("item scope is empty")
        } else if request.mode == RoundMode::Single && items.len() != 1 {
            Some("single-item rounds cover exactly one item")
        } else if request.max_bids_per_bidder == 0 {
            Some("max_bids_per_bidder must be positive")
        } else if items.iter().collect::<HashSet<_>>().len() != items.len() {
            Some("item scope lists an item twice")
        } else {
            None
        };
        if let Some(detail) = invalid {
            return Ok(Outcome::rejected(ReasonCode::InvalidRound, detail, None));
        }

        let now = self.clock.now();
        let round = Round::from_request(request, now);
        self.storage.insert_round(round.clone()).await?;
        info!(round_id = %round.id, items = round.items().len(), "Round created");
        self.notifier
            .emit(
                actor,
                AuctionEvent::RoundCreated {
                    round_id: round.id.clone(),
                    round_number: round.round_number,
                    closes_at: round.closes_at,
                },
                now,
            )
            .await;
        Ok(Outcome::accepted(round))
    }

    /// Stop accepting bids. Past `active` this is a no-op that returns the
    /// round as it stands. Auto rounds finalize right away.
    #[instrument(skip(self, actor), fields(round_id = %round_id))]
    pub async fn close_round(
        &self,
        actor: &Actor,
        round_id: &RoundId,
    ) -> EngineResult<Outcome<Round>> {
        if !actor.is_operator() {
            return Ok(not_operator("close rounds"));
        }
        let now = self.clock.now();
        let transition = match self
            .storage
            .transition_round(round_id, &[RoundStatus::Active], RoundStatus::Finalizing, now)
            .await
        {
            Err(StorageError::NotFound(_)) => return Ok(unknown_round(round_id)),
            other => other?,
        };

        let round = match transition {
            RoundTransition::Applied { from, round } => {
                info!("Round closed");
                self.notifier
                    .emit(
                        actor,
                        AuctionEvent::RoundClosed {
                            round_id: round.id.clone(),
                        },
                        now,
                    )
                    .await;
                self.status_changed(actor, &round, from).await;
                round
            }
            RoundTransition::Stale(round) => return Ok(Outcome::no_op(round)),
        };

        if round.finalization_mode == FinalizationMode::Manual {
            return Ok(Outcome::accepted(round));
        }
        let finalized = self.finalize(actor, round).await?;
        Ok(Outcome::accepted(finalized.round))
    }

    /// Reveal, resolve and derive the round's status. Safe to repeat.
    #[instrument(skip(self, actor), fields(round_id = %round_id))]
    pub async fn finalize_round(
        &self,
        actor: &Actor,
        round_id: &RoundId,
    ) -> EngineResult<Outcome<Finalization>> {
        if !actor.is_operator() {
            return Ok(not_operator("finalize rounds"));
        }
        let Some(round) = self.storage.get_round(round_id).await? else {
            return Ok(unknown_round(round_id));
        };
        match round.status {
            RoundStatus::Active => Ok(Outcome::rejected(
                ReasonCode::RoundNotClosed,
                format!("{} is still accepting bids", round_id),
                Some(Finalization {
                    round,
                    report: None,
                    reconcile: None,
                }),
            )),
            RoundStatus::Completed | RoundStatus::Cancelled => Ok(Outcome::no_op(Finalization {
                round,
                report: None,
                reconcile: None,
            })),
            RoundStatus::Finalizing | RoundStatus::Tiebreaker => {
                let before = round.status;
                let finalization = self.finalize(actor, round).await?;
                let Some(report) = &finalization.report else {
                    return Ok(Outcome::accepted(finalization));
                };
                if report.lost_race() {
                    Ok(Outcome::rejected(
                        ReasonCode::LostRace,
                        format!("a concurrent finalize of {} settled items first", round_id),
                        Some(finalization),
                    ))
                } else if report.all_settled() && finalization.round.status == before {
                    Ok(Outcome::no_op(finalization))
                } else {
                    Ok(Outcome::accepted(finalization))
                }
            }
        }
    }

    async fn finalize(&self, actor: &Actor, round: Round) -> EngineResult<Finalization> {
        let bids = self.bids.reveal(actor, &round).await?;
        let report = self.resolver.resolve_round(actor, &round, &bids).await?;
        let reconcile = self.derive(&round).await?;
        let round = self.advance(actor, round, &reconcile).await?;
        Ok(Finalization {
            round,
            report: Some(report),
            reconcile: Some(reconcile),
        })
    }

    /// Resolution plan for a closed round, without writing anything.
    pub async fn preview(
        &self,
        actor: &Actor,
        round_id: &RoundId,
    ) -> EngineResult<Outcome<ResolutionReport>> {
        if !actor.is_operator() {
            return Ok(not_operator("preview rounds"));
        }
        let Some(round) = self.storage.get_round(round_id).await? else {
            return Ok(unknown_round(round_id));
        };
        if round.status == RoundStatus::Active {
            return Ok(Outcome::rejected(
                ReasonCode::RoundNotClosed,
                format!("{} is still accepting bids", round_id),
                None,
            ));
        }
        let bids = self.bids.unsealed(&round).await?;
        let report = self.resolver.preview(actor, &round, &bids).await?;
        Ok(Outcome::accepted(report))
    }

    #[instrument(skip(self, actor), fields(round_id = %round_id))]
    pub async fn cancel_round(
        &self,
        actor: &Actor,
        round_id: &RoundId,
    ) -> EngineResult<Outcome<Round>> {
        if !actor.is_operator() {
            return Ok(not_operator("cancel rounds"));
        }
        let now = self.clock.now();
        let transition = match self
            .storage
            .transition_round(
                round_id,
                &[RoundStatus::Active, RoundStatus::Finalizing],
                RoundStatus::Cancelled,
                now,
            )
            .await
        {
            Err(StorageError::NotFound(_)) => return Ok(unknown_round(round_id)),
            other => other?,
        };

        match transition {
            RoundTransition::Applied { from, round } => {
                warn!(from = %from, "Round cancelled");
                self.notifier
                    .emit(
                        actor,
                        AuctionEvent::RoundCancelled {
                            round_id: round.id.clone(),
                            from,
                        },
                        now,
                    )
                    .await;
                Ok(Outcome::accepted(round))
            }
            RoundTransition::Stale(round) if round.status == RoundStatus::Cancelled => {
                Ok(Outcome::no_op(round))
            }
            RoundTransition::Stale(round) => Ok(Outcome::rejected(
                ReasonCode::RoundNotActive,
                format!("{} is {} and can no longer be cancelled", round.id, round.status),
                Some(round),
            )),
        }
    }

    /// Push `closes_at` out while the round is still open.
    #[instrument(skip(self, actor), fields(round_id = %round_id))]
    pub async fn extend_round(
        &self,
        actor: &Actor,
        round_id: &RoundId,
        minutes: u32,
    ) -> EngineResult<Outcome<Round>> {
        if !actor.is_operator() {
            return Ok(not_operator("extend rounds"));
        }
        if minutes == 0 {
            return Ok(Outcome::rejected(
                ReasonCode::InvalidWindow,
                "extension must be at least one minute",
                None,
            ));
        }
        let now = self.clock.now();
        let by = Duration::minutes(i64::from(minutes));
        let transition = match self.storage.extend_round(round_id, by, now).await {
            Err(StorageError::NotFound(_)) => return Ok(unknown_round(round_id)),
            other => other?,
        };
        match transition {
            RoundTransition::Applied { round, .. } => {
                info!(minutes, closes_at = %round.closes_at, "Round extended");
                self.notifier
                    .emit(
                        actor,
                        AuctionEvent::RoundExtended {
                            round_id: round.id.clone(),
                            closes_at: round.closes_at,
                        },
                        now,
                    )
                    .await;
                Ok(Outcome::accepted(round))
            }
            RoundTransition::Stale(round) => Ok(Outcome::rejected(
                ReasonCode::RoundNotActive,
                format!("{} is {}", round.id, round.status),
                Some(round),
            )),
        }
    }

    /// Re-derive the round's status from its items and advance it if the
    /// items allow. Never advances past an unresolved item. Resolved
    /// tiebreakers whose item never settled are settled first.
    #[instrument(skip(self, actor), fields(round_id = %round_id))]
    pub async fn reconcile(
        &self,
        actor: &Actor,
        round_id: &RoundId,
    ) -> EngineResult<Outcome<Reconciliation>> {
        if !actor.is_operator() {
            return Ok(not_operator("reconcile rounds"));
        }
        let Some(round) = self.storage.get_round(round_id).await? else {
            return Ok(unknown_round(round_id));
        };
        if round.status == RoundStatus::Active {
            return Ok(Outcome::rejected(
                ReasonCode::RoundNotClosed,
                format!("{} is still accepting bids", round_id),
                None,
            ));
        }

        if round.status.is_resolving() {
            self.settle_resolved(actor, &round).await?;
        }
        let report = self.derive(&round).await?;
        if round.status.is_terminal() {
            return Ok(Outcome::no_op(Reconciliation { round, report }));
        }
        let before = round.status;
        let round = self.advance(actor, round, &report).await?;
        let reconciliation = Reconciliation { round, report };
        if reconciliation.round.status == before {
            Ok(Outcome::no_op(reconciliation))
        } else {
            Ok(Outcome::accepted(reconciliation))
        }
    }

    /// Settle items whose latest tiebreaker is resolved but which have
    /// neither an allocation nor an exclusion.
    async fn settle_resolved(&self, actor: &Actor, round: &Round) -> EngineResult<()> {
        let settled = self.settled_items(round).await?;
        // Oldest first, so each item keeps its latest tiebreaker.
        let latest = self
            .storage
            .list_round_tiebreakers(&round.id)
            .await?
            .into_iter()
            .map(|tb| (tb.item_id().clone(), tb))
            .collect::<HashMap<_, _>>();
        for tb in latest.into_values() {
            if tb.is_active() || settled.contains(tb.item_id()) {
                continue;
            }
            warn!(tiebreaker_id = %tb.id(), item = %tb.item_id(), "Settling stranded tiebreaker");
            self.resolver.settle_tiebreaker(actor, &tb).await?;
        }
        Ok(())
    }

    async fn settled_items(&self, round: &Round) -> EngineResult<HashSet<ItemId>> {
        let mut settled = self
            .storage
            .list_round_allocations(&round.id)
            .await?
            .into_iter()
            .map(|allocation| allocation.item_id)
            .collect::<HashSet<_>>();
        settled.extend(
            self.storage
                .list_round_exclusions(&round.id)
                .await?
                .into_iter()
                .map(|exclusion| exclusion.item_id),
        );
        Ok(settled)
    }

    /// Classify the round by the state of its items.
    pub async fn derive(&self, round: &Round) -> EngineResult<ReconcileReport> {
        let settled = self.settled_items(round).await?;
        let pending = round
            .items()
            .iter()
            .filter(|item| !settled.contains(*item))
            .cloned()
            .collect::<Vec<_>>();
        if pending.is_empty() {
            return Ok(ReconcileReport::Completed);
        }

        let active = self
            .storage
            .list_round_tiebreakers(&round.id)
            .await?
            .into_iter()
            .filter(|tb| tb.is_active())
            .collect::<Vec<_>>();
        let stuck = pending
            .iter()
            .filter(|item| !active.iter().any(|tb| tb.item_id() == *item))
            .cloned()
            .collect::<Vec<_>>();
        if !stuck.is_empty() {
            return Ok(ReconcileReport::Unresolved { items: stuck });
        }
        Ok(ReconcileReport::AwaitingTiebreakers {
            tiebreaker_ids: active
                .iter()
                .filter(|tb| pending.contains(tb.item_id()))
                .map(|tb| tb.id().clone())
                .collect(),
        })
    }

    async fn advance(
        &self,
        actor: &Actor,
        round: Round,
        report: &ReconcileReport,
    ) -> EngineResult<Round> {
        let (expected, to) = match report {
            ReconcileReport::Completed => (
                vec![RoundStatus::Finalizing, RoundStatus::Tiebreaker],
                RoundStatus::Completed,
            ),
            ReconcileReport::AwaitingTiebreakers { .. } => {
                (vec![RoundStatus::Finalizing], RoundStatus::Tiebreaker)
            }
            ReconcileReport::Unresolved { items } => {
                warn!(round_id = %round.id, unresolved = items.len(), "Round has unresolved items");
                return Ok(round);
            }
        };
        if !expected.contains(&round.status) {
            return Ok(round);
        }

        match self
            .storage
            .transition_round(&round.id, &expected, to, self.clock.now())
            .await?
        {
            RoundTransition::Applied { from, round } => {
                info!(round_id = %round.id, from = %from, to = %round.status, "Round advanced");
                self.status_changed(actor, &round, from).await;
                Ok(round)
            }
            RoundTransition::Stale(current) => Ok(current),
        }
    }

    async fn status_changed(&self, actor: &Actor, round: &Round, from: RoundStatus) {
        self.notifier
            .emit(
                actor,
                AuctionEvent::RoundStatusChanged {
                    round_id: round.id.clone(),
                    from,
                    to: round.status,
                },
                round.updated_at,
            )
            .await;
    }

    pub async fn round_detail(&self, round_id: &RoundId) -> EngineResult<Option<RoundDetail>> {
        let Some(round) = self.storage.get_round(round_id).await? else {
            return Ok(None);
        };
        let bids = self.storage.list_round_bids(round_id).await?;
        let allocations = self.storage.list_round_allocations(round_id).await?;
        let exclusions = self.storage.list_round_exclusions(round_id).await?;
        let tiebreakers = self
            .storage
            .list_round_tiebreakers(round_id)
            .await?
            .into_iter()
            .map(redact)
            .collect();

        Ok(Some(RoundDetail {
            round,
            bid_count: bids.len(),
            bidder_count: bids
                .iter()
                .map(|bid| &bid.bidder_id)
                .collect::<HashSet<_>>()
                .len(),
            allocation_count: allocations.len(),
            allocations,
            exclusions,
            tiebreakers,
        }))
    }
}

fn not_operator<T>(what: &str) -> Outcome<T> {
    Outcome::rejected(
        ReasonCode::Unauthorized,
        format!("only operators may {what}"),
        None,
    )
}

fn unknown_round<T>(round_id: &RoundId) -> Outcome<T> {
    Outcome::rejected(
        ReasonCode::UnknownRound,
        format!("{} does not exist", round_id),
        None,
    )
}
