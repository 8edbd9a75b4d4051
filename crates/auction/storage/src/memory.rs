//! In-memory reference implementation of the auction storage traits.
//!
//! Each table sits behind its own `RwLock`. Operations that touch several
//! tables take the locks in one global order:
//! rounds → bids → accounts → allocations → exclusions → tiebreakers → raises → audit.
//! Policies are only ever locked on their own. No lock is held across an
//! `.await`, so every guarded write is atomic with respect to every other.

use crate::model::{
    AllocationCommit, AuditAppend, AuditRecord, BidRemoval, BidReveal, BidWrite, BidWriteMode,
    CommitOutcome, DebitOutcome, ExclusionWrite, RevealOutcome, RoundTransition, SealedBidWrite,
    TiebreakerInsert, TiebreakerWrite,
};
use crate::traits::{
    AccountStore, AllocationStore, AuditStore, BidStore, PolicyStore, QueryWindow, RoundStore,
    TiebreakerStore,
};
use crate::{StorageError, StorageResult};
use async_trait::async_trait;
use auction_types::{
    Allocation, Amount, Bid, BidId, BidStatus, BidderAccount, BidderId, ItemExclusion, ItemId,
    PhasePolicy, RaiseEvent, ReasonCode, Round, RoundId, RoundStatus, SeriesId,
    TiebreakResolution, Tiebreaker, TiebreakerId, TiebreakerStatus,
};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

/// In-memory auction storage adapter.
#[derive(Default)]
pub struct InMemoryAuctionStorage {
    rounds: RwLock<HashMap<RoundId, Round>>,
    bids: RwLock<HashMap<BidId, Bid>>,
    accounts: RwLock<HashMap<BidderId, BidderAccount>>,
    allocations: RwLock<HashMap<ItemId, Allocation>>,
    exclusions: RwLock<HashMap<(RoundId, ItemId), ItemExclusion>>,
    tiebreakers: RwLock<HashMap<TiebreakerId, Tiebreaker>>,
    raises: RwLock<HashMap<TiebreakerId, Vec<RaiseEvent>>>,
    audits: RwLock<Vec<AuditRecord>>,
    policies: RwLock<HashMap<SeriesId, PhasePolicy>>,
}

impl InMemoryAuctionStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

fn read<'a, T>(lock: &'a RwLock<T>, table: &str) -> StorageResult<RwLockReadGuard<'a, T>> {
    lock.read()
        .map_err(|_| StorageError::Backend(format!("{table} lock poisoned")))
}

fn write<'a, T>(lock: &'a RwLock<T>, table: &str) -> StorageResult<RwLockWriteGuard<'a, T>> {
    lock.write()
        .map_err(|_| StorageError::Backend(format!("{table} lock poisoned")))
}

fn round_bids(bids: &HashMap<BidId, Bid>, round_id: &RoundId) -> Vec<Bid> {
    let mut values = bids
        .values()
        .filter(|bid| &bid.round_id == round_id)
        .cloned()
        .collect::<Vec<_>>();
    values.sort_by(|a, b| {
        a.submitted_at
            .cmp(&b.submitted_at)
            .then_with(|| a.id.cmp(&b.id))
    });
    values
}

#[async_trait]
impl RoundStore for InMemoryAuctionStorage {
    async fn insert_round(&self, round: Round) -> StorageResult<()> {
        let mut guard = write(&self.rounds, "rounds")?;
        if guard.contains_key(&round.id) {
            return Err(StorageError::Conflict(format!(
                "round {} already exists",
                round.id
            )));
        }
        guard.insert(round.id.clone(), round);
        Ok(())
    }

    async fn get_round(&self, round_id: &RoundId) -> StorageResult<Option<Round>> {
        let guard = read(&self.rounds, "rounds")?;
        Ok(guard.get(round_id).cloned())
    }

    async fn list_rounds(&self, statuses: &[RoundStatus]) -> StorageResult<Vec<Round>> {
        let guard = read(&self.rounds, "rounds")?;
        let mut values = guard
            .values()
            .filter(|round| statuses.is_empty() || statuses.contains(&round.status))
            .cloned()
            .collect::<Vec<_>>();
        values.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(values)
    }

    async fn transition_round(
        &self,
        round_id: &RoundId,
        expected_from: &[RoundStatus],
        to: RoundStatus,
        at: DateTime<Utc>,
    ) -> StorageResult<RoundTransition> {
        let mut guard = write(&self.rounds, "rounds")?;
        let round = guard
            .get_mut(round_id)
            .ok_or_else(|| StorageError::NotFound(format!("round {} not found", round_id)))?;

        if !expected_from.contains(&round.status) {
            return Ok(RoundTransition::Stale(round.clone()));
        }

        let from = round.status;
        round.status = to;
        round.updated_at = at;
        Ok(RoundTransition::Applied {
            from,
            round: round.clone(),
        })
    }

    async fn extend_round(
        &self,
        round_id: &RoundId,
        by: Duration,
        at: DateTime<Utc>,
    ) -> StorageResult<RoundTransition> {
        if by <= Duration::zero() {
            return Err(StorageError::InvalidInput(
                "extension must be positive".to_string(),
            ));
        }

        let mut guard = write(&self.rounds, "rounds")?;
        let round = guard
            .get_mut(round_id)
            .ok_or_else(|| StorageError::NotFound(format!("round {} not found", round_id)))?;

        if round.status != RoundStatus::Active {
            return Ok(RoundTransition::Stale(round.clone()));
        }

        round.closes_at += by;
        round.updated_at = at;
        Ok(RoundTransition::Applied {
            from: RoundStatus::Active,
            round: round.clone(),
        })
    }
}

#[async_trait]
impl BidStore for InMemoryAuctionStorage {
    async fn upsert_sealed_bid(&self, request: SealedBidWrite) -> StorageResult<BidWrite> {
        let rounds = read(&self.rounds, "rounds")?;
        let round = rounds.get(&request.round_id).ok_or_else(|| {
            StorageError::NotFound(format!("round {} not found", request.round_id))
        })?;
        if !round.accepts_bids_at(request.at) {
            return Ok(BidWrite::Rejected(ReasonCode::RoundNotActive));
        }

        let mut bids = write(&self.bids, "bids")?;
        let same_slot = |bid: &Bid| {
            bid.round_id == request.round_id
                && bid.bidder_id == request.bidder_id
                && bid.is_active()
        };

        let target = match &request.mode {
            BidWriteMode::Submit => bids
                .values()
                .find(|bid| same_slot(*bid) && bid.item_tag == request.item_tag)
                .map(|bid| bid.id.clone()),
            BidWriteMode::Revise { bid_id } => {
                let known = bids
                    .get(bid_id)
                    .filter(|bid| same_slot(*bid) && bid.item_tag == request.item_tag)
                    .map(|bid| bid.id.clone());
                if known.is_none() {
                    return Ok(BidWrite::Rejected(ReasonCode::UnknownBid));
                }
                known
            }
        };

        if let Some(bid_id) = target {
            let bid = bids
                .get_mut(&bid_id)
                .ok_or_else(|| StorageError::NotFound(format!("bid {} not found", bid_id)))?;
            bid.sealed_payload = request.sealed_payload;
            bid.updated_at = request.at;
            return Ok(BidWrite::Replaced(bid.clone()));
        }

        let active = bids.values().filter(|bid| same_slot(*bid)).count();
        if active >= round.max_bids_per_bidder as usize {
            return Ok(BidWrite::Rejected(ReasonCode::BidCapReached));
        }

        let bid = Bid {
            id: BidId::generate(),
            round_id: request.round_id,
            bidder_id: request.bidder_id,
            item_tag: request.item_tag,
            item_id: None,
            sealed_payload: request.sealed_payload,
            revealed_amount: None,
            status: BidStatus::Active,
            submitted_at: request.at,
            updated_at: request.at,
        };
        bids.insert(bid.id.clone(), bid.clone());
        Ok(BidWrite::Inserted(bid))
    }

    async fn withdraw_bid(
        &self,
        round_id: &RoundId,
        bidder_id: &BidderId,
        bid_id: &BidId,
        at: DateTime<Utc>,
    ) -> StorageResult<BidRemoval> {
        let rounds = read(&self.rounds, "rounds")?;
        let round = rounds
            .get(round_id)
            .ok_or_else(|| StorageError::NotFound(format!("round {} not found", round_id)))?;
        if !round.accepts_bids_at(at) {
            return Ok(BidRemoval::Rejected(ReasonCode::RoundNotActive));
        }

        let mut bids = write(&self.bids, "bids")?;
        let owned = bids.get(bid_id).is_some_and(|bid| {
            &bid.round_id == round_id && &bid.bidder_id == bidder_id && bid.is_active()
        });
        if !owned {
            return Ok(BidRemoval::Rejected(ReasonCode::UnknownBid));
        }
        match bids.remove(bid_id) {
            Some(bid) => Ok(BidRemoval::Removed(bid)),
            None => Ok(BidRemoval::Rejected(ReasonCode::UnknownBid)),
        }
    }

    async fn get_bid(&self, bid_id: &BidId) -> StorageResult<Option<Bid>> {
        let guard = read(&self.bids, "bids")?;
        Ok(guard.get(bid_id).cloned())
    }

    async fn list_round_bids(&self, round_id: &RoundId) -> StorageResult<Vec<Bid>> {
        let guard = read(&self.bids, "bids")?;
        Ok(round_bids(&guard, round_id))
    }

    async fn list_bidder_bids(
        &self,
        round_id: &RoundId,
        bidder_id: &BidderId,
    ) -> StorageResult<Vec<Bid>> {
        let guard = read(&self.bids, "bids")?;
        Ok(round_bids(&guard, round_id)
            .into_iter()
            .filter(|bid| &bid.bidder_id == bidder_id)
            .collect())
    }

    async fn reveal_bids(
        &self,
        round_id: &RoundId,
        reveals: Vec<BidReveal>,
        at: DateTime<Utc>,
    ) -> StorageResult<RevealOutcome> {
        let mut rounds = write(&self.rounds, "rounds")?;
        let round = rounds
            .get_mut(round_id)
            .ok_or_else(|| StorageError::NotFound(format!("round {} not found", round_id)))?;
        let mut bids = write(&self.bids, "bids")?;

        if round.revealed_at.is_some() {
            return Ok(RevealOutcome::AlreadyRevealed(round_bids(&bids, round_id)));
        }
        if round.status == RoundStatus::Active {
            return Err(StorageError::InvalidInput(format!(
                "round {} is still accepting bids",
                round_id
            )));
        }

        let mut plaintext = reveals
            .into_iter()
            .map(|reveal| (reveal.bid_id.clone(), reveal))
            .collect::<HashMap<_, _>>();
        let sealed = bids
            .values()
            .filter(|bid| &bid.round_id == round_id)
            .count();
        if plaintext.len() != sealed {
            return Err(StorageError::InvalidInput(format!(
                "reveal for round {} covers {} of {} bids",
                round_id,
                plaintext.len(),
                sealed
            )));
        }

        // Validate everything before touching any row.
        for bid in bids.values().filter(|bid| &bid.round_id == round_id) {
            if !plaintext.contains_key(&bid.id) {
                return Err(StorageError::InvalidInput(format!(
                    "reveal for round {} is missing bid {}",
                    round_id, bid.id
                )));
            }
        }

        for bid in bids.values_mut().filter(|bid| &bid.round_id == round_id) {
            if let Some(reveal) = plaintext.remove(&bid.id) {
                bid.item_id = Some(reveal.item_id);
                bid.revealed_amount = Some(reveal.amount);
                bid.updated_at = at;
            }
        }
        round.revealed_at = Some(at);
        round.updated_at = at;

        Ok(RevealOutcome::Revealed(round_bids(&bids, round_id)))
    }
}

fn budget_check(
    account: &BidderAccount,
    amount: Amount,
    floor: Amount,
) -> Result<(), ReasonCode> {
    match account.balance.checked_sub(amount) {
        Some(remaining) if remaining >= floor => Ok(()),
        _ => Err(ReasonCode::ReserveBreach),
    }
}

#[async_trait]
impl AccountStore for InMemoryAuctionStorage {
    async fn get_account(&self, bidder_id: &BidderId) -> StorageResult<Option<BidderAccount>> {
        let guard = read(&self.accounts, "accounts")?;
        Ok(guard.get(bidder_id).cloned())
    }

    async fn seed_account(&self, account: BidderAccount) -> StorageResult<BidderAccount> {
        let mut guard = write(&self.accounts, "accounts")?;
        Ok(guard
            .entry(account.bidder_id.clone())
            .or_insert(account)
            .clone())
    }

    async fn put_account(&self, account: BidderAccount) -> StorageResult<()> {
        let mut guard = write(&self.accounts, "accounts")?;
        guard.insert(account.bidder_id.clone(), account);
        Ok(())
    }

    async fn debit(
        &self,
        bidder_id: &BidderId,
        amount: Amount,
        floor: Amount,
        at: DateTime<Utc>,
    ) -> StorageResult<DebitOutcome> {
        let mut guard = write(&self.accounts, "accounts")?;
        let account = guard
            .get_mut(bidder_id)
            .ok_or_else(|| StorageError::NotFound(format!("account {} not found", bidder_id)))?;

        if let Err(code) = budget_check(account, amount, floor) {
            return Ok(DebitOutcome::Rejected {
                code,
                account: account.clone(),
            });
        }

        account.balance -= amount;
        account.updated_at = at;
        Ok(DebitOutcome::Applied(account.clone()))
    }
}

#[async_trait]
impl AllocationStore for InMemoryAuctionStorage {
    async fn commit_allocation(&self, commit: AllocationCommit) -> StorageResult<CommitOutcome> {
        let allocation = commit.allocation;
        let mut bids = write(&self.bids, "bids")?;
        let mut accounts = write(&self.accounts, "accounts")?;
        let mut allocations = write(&self.allocations, "allocations")?;
        let exclusions = read(&self.exclusions, "exclusions")?;

        if let Some(existing) = allocations.get(&allocation.item_id) {
            return Ok(if existing.round_id == allocation.round_id {
                CommitOutcome::AlreadyAllocated(existing.clone())
            } else {
                CommitOutcome::HeldElsewhere(existing.clone())
            });
        }
        if let Some(existing) =
            exclusions.get(&(allocation.round_id.clone(), allocation.item_id.clone()))
        {
            return Ok(CommitOutcome::AlreadyExcluded(existing.clone()));
        }

        let winning = bids
            .get(&allocation.bid_id)
            .ok_or_else(|| StorageError::NotFound(format!("bid {} not found", allocation.bid_id)))?;
        let consistent = winning.round_id == allocation.round_id
            && winning.bidder_id == allocation.bidder_id
            && winning.item_id.as_ref() == Some(&allocation.item_id)
            && winning.is_active();
        if !consistent {
            return Err(StorageError::InvariantViolation(format!(
                "bid {} cannot win item {} in {}",
                allocation.bid_id, allocation.item_id, allocation.round_id
            )));
        }

        let account = accounts.get_mut(&allocation.bidder_id).ok_or_else(|| {
            StorageError::NotFound(format!("account {} not found", allocation.bidder_id))
        })?;
        if account.items_acquired >= commit.max_items {
            return Ok(CommitOutcome::BudgetRejected {
                code: ReasonCode::ItemCapReached,
                account: account.clone(),
            });
        }
        if let Err(code) = budget_check(account, allocation.price, commit.reserve_floor) {
            return Ok(CommitOutcome::BudgetRejected {
                code,
                account: account.clone(),
            });
        }

        account.balance -= allocation.price;
        account.items_acquired += 1;
        account.updated_at = allocation.acquired_at;

        for bid in bids.values_mut().filter(|bid| {
            bid.round_id == allocation.round_id
                && bid.item_id.as_ref() == Some(&allocation.item_id)
                && bid.is_active()
        }) {
            bid.status = if bid.id == allocation.bid_id {
                BidStatus::Won
            } else {
                BidStatus::Lost
            };
            bid.updated_at = allocation.acquired_at;
        }

        allocations.insert(allocation.item_id.clone(), allocation.clone());
        Ok(CommitOutcome::Committed {
            allocation,
            account: account.clone(),
        })
    }

    async fn get_allocation(&self, item_id: &ItemId) -> StorageResult<Option<Allocation>> {
        let guard = read(&self.allocations, "allocations")?;
        Ok(guard.get(item_id).cloned())
    }

    async fn list_round_allocations(&self, round_id: &RoundId) -> StorageResult<Vec<Allocation>> {
        let guard = read(&self.allocations, "allocations")?;
        let mut values = guard
            .values()
            .filter(|allocation| &allocation.round_id == round_id)
            .cloned()
            .collect::<Vec<_>>();
        values.sort_by(|a, b| a.acquired_at.cmp(&b.acquired_at));
        Ok(values)
    }

    async fn list_bidder_allocations(
        &self,
        bidder_id: &BidderId,
    ) -> StorageResult<Vec<Allocation>> {
        let guard = read(&self.allocations, "allocations")?;
        let mut values = guard
            .values()
            .filter(|allocation| &allocation.bidder_id == bidder_id)
            .cloned()
            .collect::<Vec<_>>();
        values.sort_by(|a, b| a.acquired_at.cmp(&b.acquired_at));
        Ok(values)
    }

    async fn record_exclusion(&self, exclusion: ItemExclusion) -> StorageResult<ExclusionWrite> {
        let mut bids = write(&self.bids, "bids")?;
        let allocations = read(&self.allocations, "allocations")?;
        let mut exclusions = write(&self.exclusions, "exclusions")?;

        let key = (exclusion.round_id.clone(), exclusion.item_id.clone());
        if let Some(existing) = exclusions.get(&key) {
            return Ok(ExclusionWrite::Existing(existing.clone()));
        }
        if let Some(allocation) = allocations
            .get(&exclusion.item_id)
            .filter(|allocation| allocation.round_id == exclusion.round_id)
        {
            return Ok(ExclusionWrite::Allocated(allocation.clone()));
        }

        for bid in bids.values_mut().filter(|bid| {
            bid.round_id == exclusion.round_id
                && bid.item_id.as_ref() == Some(&exclusion.item_id)
                && bid.is_active()
        }) {
            bid.status = BidStatus::Lost;
            bid.updated_at = exclusion.recorded_at;
        }

        exclusions.insert(key, exclusion.clone());
        Ok(ExclusionWrite::Recorded(exclusion))
    }

    async fn list_round_exclusions(
        &self,
        round_id: &RoundId,
    ) -> StorageResult<Vec<ItemExclusion>> {
        let guard = read(&self.exclusions, "exclusions")?;
        let mut values = guard
            .values()
            .filter(|exclusion| &exclusion.round_id == round_id)
            .cloned()
            .collect::<Vec<_>>();
        values.sort_by(|a, b| a.item_id.cmp(&b.item_id));
        Ok(values)
    }
}

fn rejected(code: ReasonCode, current: &Tiebreaker) -> TiebreakerWrite {
    TiebreakerWrite::Rejected {
        code,
        current: current.clone(),
    }
}

#[async_trait]
impl TiebreakerStore for InMemoryAuctionStorage {
    async fn insert_tiebreaker(&self, tiebreaker: Tiebreaker) -> StorageResult<TiebreakerInsert> {
        let mut guard = write(&self.tiebreakers, "tiebreakers")?;
        if let Some(existing) = guard.values().find(|existing| {
            existing.is_active()
                && existing.round_id() == tiebreaker.round_id()
                && existing.item_id() == tiebreaker.item_id()
        }) {
            return Ok(TiebreakerInsert::Existing(existing.clone()));
        }
        guard.insert(tiebreaker.id().clone(), tiebreaker.clone());
        Ok(TiebreakerInsert::Opened(tiebreaker))
    }

    async fn get_tiebreaker(&self, id: &TiebreakerId) -> StorageResult<Option<Tiebreaker>> {
        let guard = read(&self.tiebreakers, "tiebreakers")?;
        Ok(guard.get(id).cloned())
    }

    async fn list_round_tiebreakers(&self, round_id: &RoundId) -> StorageResult<Vec<Tiebreaker>> {
        let guard = read(&self.tiebreakers, "tiebreakers")?;
        let mut values = guard
            .values()
            .filter(|tb| tb.round_id() == round_id)
            .cloned()
            .collect::<Vec<_>>();
        values.sort_by(|a, b| {
            a.item_id()
                .cmp(b.item_id())
                .then_with(|| a.opened_at().cmp(&b.opened_at()))
                .then_with(|| a.id().cmp(b.id()))
        });
        Ok(values)
    }

    async fn list_active_tiebreakers(&self) -> StorageResult<Vec<Tiebreaker>> {
        let guard = read(&self.tiebreakers, "tiebreakers")?;
        let mut values = guard
            .values()
            .filter(|tb| tb.is_active())
            .cloned()
            .collect::<Vec<_>>();
        values.sort_by(|a, b| a.id().cmp(b.id()));
        Ok(values)
    }

    async fn record_revision(
        &self,
        id: &TiebreakerId,
        bidder_id: &BidderId,
        amount: Amount,
        at: DateTime<Utc>,
    ) -> StorageResult<TiebreakerWrite> {
        let mut guard = write(&self.tiebreakers, "tiebreakers")?;
        let stored = guard
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(format!("tiebreaker {} not found", id)))?;
        let snapshot = stored.clone();

        let Tiebreaker::FixedWindow(tb) = stored else {
            return Ok(rejected(ReasonCode::UnknownTiebreaker, &snapshot));
        };
        if tb.status != TiebreakerStatus::Active {
            return Ok(rejected(ReasonCode::TiebreakerNotActive, &snapshot));
        }
        if tb.is_expired(at) {
            return Ok(rejected(ReasonCode::WindowExpired, &snapshot));
        }
        if amount < tb.tied_amount {
            return Ok(rejected(ReasonCode::RevisionBelowTiedAmount, &snapshot));
        }
        let Some(participant) = tb
            .participants
            .iter_mut()
            .find(|p| &p.bidder_id == bidder_id)
        else {
            return Ok(rejected(ReasonCode::NotParticipant, &snapshot));
        };
        if participant.has_submitted {
            return Ok(rejected(ReasonCode::AlreadySubmitted, &snapshot));
        }

        participant.revised_amount = Some(amount);
        participant.has_submitted = true;
        participant.submitted_at = Some(at);
        Ok(TiebreakerWrite::Applied(stored.clone()))
    }

    async fn apply_raise(
        &self,
        id: &TiebreakerId,
        bidder_id: &BidderId,
        amount: Amount,
        at: DateTime<Utc>,
    ) -> StorageResult<TiebreakerWrite> {
        let mut guard = write(&self.tiebreakers, "tiebreakers")?;
        let mut raises = write(&self.raises, "raises")?;
        let stored = guard
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(format!("tiebreaker {} not found", id)))?;
        let snapshot = stored.clone();

        let Tiebreaker::Continuous(tb) = stored else {
            return Ok(rejected(ReasonCode::UnknownTiebreaker, &snapshot));
        };
        if tb.status != TiebreakerStatus::Active {
            return Ok(rejected(ReasonCode::TiebreakerNotActive, &snapshot));
        }
        if tb.is_idle(at) {
            return Ok(rejected(ReasonCode::WindowExpired, &snapshot));
        }
        if !tb
            .participant(bidder_id)
            .is_some_and(|participant| !participant.withdrawn)
        {
            return Ok(rejected(ReasonCode::NotParticipant, &snapshot));
        }
        // The compare and the write happen under one guard.
        if amount <= tb.current_high_amount {
            return Ok(rejected(ReasonCode::BelowCurrentHigh, &snapshot));
        }

        tb.current_high_amount = amount;
        tb.current_high_bidder = Some(bidder_id.clone());
        tb.last_activity_at = at;

        let log = raises.entry(id.clone()).or_default();
        log.push(RaiseEvent {
            tiebreaker_id: id.clone(),
            sequence: log.len() as u64 + 1,
            bidder_id: bidder_id.clone(),
            amount,
            at,
        });
        Ok(TiebreakerWrite::Applied(stored.clone()))
    }

    async fn withdraw_participant(
        &self,
        id: &TiebreakerId,
        bidder_id: &BidderId,
        _at: DateTime<Utc>,
    ) -> StorageResult<TiebreakerWrite> {
        let mut guard = write(&self.tiebreakers, "tiebreakers")?;
        let stored = guard
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(format!("tiebreaker {} not found", id)))?;
        let snapshot = stored.clone();

        let Tiebreaker::Continuous(tb) = stored else {
            return Ok(rejected(ReasonCode::UnknownTiebreaker, &snapshot));
        };
        if tb.status != TiebreakerStatus::Active {
            return Ok(rejected(ReasonCode::TiebreakerNotActive, &snapshot));
        }
        if tb.current_high_bidder.as_ref() == Some(bidder_id) || tb.remaining().len() <= 1 {
            return Ok(rejected(ReasonCode::LeaderCannotWithdraw, &snapshot));
        }
        let Some(participant) = tb
            .participants
            .iter_mut()
            .find(|p| &p.bidder_id == bidder_id && !p.withdrawn)
        else {
            return Ok(rejected(ReasonCode::NotParticipant, &snapshot));
        };

        participant.withdrawn = true;
        Ok(TiebreakerWrite::Applied(stored.clone()))
    }

    async fn extend_tiebreaker(
        &self,
        id: &TiebreakerId,
        minutes: u32,
        _at: DateTime<Utc>,
    ) -> StorageResult<TiebreakerWrite> {
        if minutes == 0 {
            return Err(StorageError::InvalidInput(
                "extension must be positive".to_string(),
            ));
        }

        let mut guard = write(&self.tiebreakers, "tiebreakers")?;
        let stored = guard
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(format!("tiebreaker {} not found", id)))?;
        let snapshot = stored.clone();

        let Tiebreaker::FixedWindow(tb) = stored else {
            return Ok(rejected(ReasonCode::NotExtendable, &snapshot));
        };
        if tb.status != TiebreakerStatus::Active {
            return Ok(rejected(ReasonCode::TiebreakerNotActive, &snapshot));
        }

        tb.duration_minutes = tb.duration_minutes.saturating_add(minutes);
        Ok(TiebreakerWrite::Applied(stored.clone()))
    }

    async fn resolve_tiebreaker(
        &self,
        id: &TiebreakerId,
        resolution: TiebreakResolution,
        at: DateTime<Utc>,
    ) -> StorageResult<TiebreakerWrite> {
        let mut guard = write(&self.tiebreakers, "tiebreakers")?;
        let stored = guard
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(format!("tiebreaker {} not found", id)))?;
        if !stored.is_active() {
            return Ok(rejected(ReasonCode::TiebreakerNotActive, stored));
        }

        match stored {
            Tiebreaker::FixedWindow(tb) => {
                tb.status = TiebreakerStatus::Resolved;
                tb.resolution = Some(resolution);
                tb.resolved_at = Some(at);
            }
            Tiebreaker::Continuous(tb) => {
                tb.status = TiebreakerStatus::Resolved;
                tb.resolution = Some(resolution);
                tb.resolved_at = Some(at);
            }
        }
        Ok(TiebreakerWrite::Applied(stored.clone()))
    }

    async fn list_raise_events(&self, id: &TiebreakerId) -> StorageResult<Vec<RaiseEvent>> {
        let guard = read(&self.raises, "raises")?;
        Ok(guard.get(id).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl PolicyStore for InMemoryAuctionStorage {
    async fn put_policy(&self, policy: PhasePolicy) -> StorageResult<()> {
        let mut guard = write(&self.policies, "policies")?;
        guard.insert(policy.series_id.clone(), policy);
        Ok(())
    }

    async fn get_policy(&self, series_id: &SeriesId) -> StorageResult<Option<PhasePolicy>> {
        let guard = read(&self.policies, "policies")?;
        Ok(guard.get(series_id).cloned())
    }
}

#[async_trait]
impl AuditStore for InMemoryAuctionStorage {
    async fn append_audit(&self, event: AuditAppend) -> StorageResult<AuditRecord> {
        let mut guard = write(&self.audits, "audit")?;

        let previous_hash = guard.last().map(|e| e.hash.clone());
        let sequence = guard.len() as u64 + 1;
        let hash = compute_audit_hash(&event, previous_hash.as_deref(), sequence)?;

        let record = AuditRecord {
            event_id: format!("audit-{}", Uuid::new_v4()),
            sequence,
            timestamp: event.timestamp,
            actor: event.actor,
            stage: event.stage,
            round_id: event.round_id,
            message: event.message,
            payload: event.payload,
            previous_hash,
            hash,
        };

        guard.push(record.clone());
        Ok(record)
    }

    async fn list_audit(&self, window: QueryWindow) -> StorageResult<Vec<AuditRecord>> {
        let guard = read(&self.audits, "audit")?;
        let mut values = guard.clone();
        values.sort_by(|a, b| b.sequence.cmp(&a.sequence));
        Ok(apply_window(values, window))
    }

    async fn latest_audit_hash(&self) -> StorageResult<Option<String>> {
        let guard = read(&self.audits, "audit")?;
        Ok(guard.last().map(|e| e.hash.clone()))
    }
}

fn compute_audit_hash(
    event: &AuditAppend,
    previous_hash: Option<&str>,
    sequence: u64,
) -> StorageResult<String> {
    let serializable = serde_json::json!({
        "previous_hash": previous_hash,
        "sequence": sequence,
        "timestamp": event.timestamp,
        "actor": event.actor,
        "stage": event.stage,
        "round_id": event.round_id,
        "message": event.message,
        "payload": event.payload,
    });
    let serialized = serde_json::to_vec(&serializable)
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
    Ok(blake3::hash(&serialized).to_hex().to_string())
}

fn apply_window<T>(items: Vec<T>, window: QueryWindow) -> Vec<T> {
    let iter = items.into_iter().skip(window.offset);
    if window.limit == 0 {
        iter.collect()
    } else {
        iter.take(window.limit).collect()
    }
}
