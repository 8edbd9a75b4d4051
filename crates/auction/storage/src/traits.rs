use crate::model::{
    AllocationCommit, AuditAppend, AuditRecord, BidRemoval, BidReveal, BidWrite, CommitOutcome,
    DebitOutcome, ExclusionWrite, RevealOutcome, RoundTransition, SealedBidWrite,
    TiebreakerInsert, TiebreakerWrite,
};
use crate::StorageResult;
use async_trait::async_trait;
use auction_types::{
    Allocation, Amount, Bid, BidId, BidderAccount, BidderId, ItemExclusion, ItemId, PhasePolicy,
    RaiseEvent, Round, RoundId, RoundStatus, SeriesId, TiebreakResolution, Tiebreaker,
    TiebreakerId,
};
use chrono::{DateTime, Utc};

/// Generic query window for paged reads.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryWindow {
    pub limit: usize,
    pub offset: usize,
}

/// Storage interface for rounds.
#[async_trait]
pub trait RoundStore: Send + Sync {
    async fn insert_round(&self, round: Round) -> StorageResult<()>;

    async fn get_round(&self, round_id: &RoundId) -> StorageResult<Option<Round>>;

    /// Rounds in any of `statuses` (all rounds when empty), oldest first.
    async fn list_rounds(&self, statuses: &[RoundStatus]) -> StorageResult<Vec<Round>>;

    /// Set `to` only if the current status is one of `expected_from`.
    ///
    /// Exactly one of any number of concurrent callers observes `Applied`.
    async fn transition_round(
        &self,
        round_id: &RoundId,
        expected_from: &[RoundStatus],
        to: RoundStatus,
        at: DateTime<Utc>,
    ) -> StorageResult<RoundTransition>;

    /// Push `closes_at` out by `by`, only while the round is `active`.
    async fn extend_round(
        &self,
        round_id: &RoundId,
        by: chrono::Duration,
        at: DateTime<Utc>,
    ) -> StorageResult<RoundTransition>;
}

/// Storage interface for sealed bids.
#[async_trait]
pub trait BidStore: Send + Sync {
    /// Insert or replace a sealed bid. Rejects when the round no longer
    /// accepts bids at `write.at` or the bidder's cap is reached.
    async fn upsert_sealed_bid(&self, write: SealedBidWrite) -> StorageResult<BidWrite>;

    /// Remove an active bid while its round is still open.
    async fn withdraw_bid(
        &self,
        round_id: &RoundId,
        bidder_id: &BidderId,
        bid_id: &BidId,
        at: DateTime<Utc>,
    ) -> StorageResult<BidRemoval>;

    async fn get_bid(&self, bid_id: &BidId) -> StorageResult<Option<Bid>>;

    /// Bids of a round, oldest first.
    async fn list_round_bids(&self, round_id: &RoundId) -> StorageResult<Vec<Bid>>;

    async fn list_bidder_bids(
        &self,
        round_id: &RoundId,
        bidder_id: &BidderId,
    ) -> StorageResult<Vec<Bid>>;

    /// Turn a round's sealed bids into plaintext, exactly once.
    ///
    /// `reveals` must cover every bid of the round. A repeated call returns
    /// the stored plaintext and ignores `reveals`.
    async fn reveal_bids(
        &self,
        round_id: &RoundId,
        reveals: Vec<BidReveal>,
        at: DateTime<Utc>,
    ) -> StorageResult<RevealOutcome>;
}

/// Storage interface for bidder budgets.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn get_account(&self, bidder_id: &BidderId) -> StorageResult<Option<BidderAccount>>;

    /// Insert `account` unless one exists; returns the stored account.
    async fn seed_account(&self, account: BidderAccount) -> StorageResult<BidderAccount>;

    /// Overwrite an account (administrative balance set).
    async fn put_account(&self, account: BidderAccount) -> StorageResult<()>;

    /// Conditional decrement: applies only if `balance - amount >= floor`.
    async fn debit(
        &self,
        bidder_id: &BidderId,
        amount: Amount,
        floor: Amount,
        at: DateTime<Utc>,
    ) -> StorageResult<DebitOutcome>;
}

/// Storage interface for the global allocation table and item exclusions.
#[async_trait]
pub trait AllocationStore: Send + Sync {
    /// Allocate an item in one transaction: insert the allocation, debit the
    /// winner against the floor and item cap, mark the winning bid `won` and
    /// every other active bid for the item in the round `lost`.
    ///
    /// An item that is already allocated or excluded is reported through
    /// the outcome and nothing is written.
    async fn commit_allocation(&self, commit: AllocationCommit) -> StorageResult<CommitOutcome>;

    async fn get_allocation(&self, item_id: &ItemId) -> StorageResult<Option<Allocation>>;

    async fn list_round_allocations(&self, round_id: &RoundId) -> StorageResult<Vec<Allocation>>;

    async fn list_bidder_allocations(&self, bidder_id: &BidderId)
        -> StorageResult<Vec<Allocation>>;

    /// Record that an item stays unallocated in a round and mark its
    /// remaining active bids `lost`. Idempotent. Refused with
    /// `ExclusionWrite::Allocated` when the round already allocated the item.
    async fn record_exclusion(&self, exclusion: ItemExclusion) -> StorageResult<ExclusionWrite>;

    async fn list_round_exclusions(&self, round_id: &RoundId)
        -> StorageResult<Vec<ItemExclusion>>;
}

/// Storage interface for both tiebreaker flavours.
#[async_trait]
pub trait TiebreakerStore: Send + Sync {
    /// Insert unless an active tiebreaker exists for the same round and item.
    /// A resolved one does not block: the item may go to a lower tier.
    async fn insert_tiebreaker(&self, tiebreaker: Tiebreaker) -> StorageResult<TiebreakerInsert>;

    async fn get_tiebreaker(&self, id: &TiebreakerId) -> StorageResult<Option<Tiebreaker>>;

    /// Ordered by item, then oldest first.
    async fn list_round_tiebreakers(&self, round_id: &RoundId) -> StorageResult<Vec<Tiebreaker>>;

    async fn list_active_tiebreakers(&self) -> StorageResult<Vec<Tiebreaker>>;

    /// Fixed window: record one revision, only if active, unexpired, not yet
    /// submitted by this participant, and at least the tied amount.
    async fn record_revision(
        &self,
        id: &TiebreakerId,
        bidder_id: &BidderId,
        amount: Amount,
        at: DateTime<Utc>,
    ) -> StorageResult<TiebreakerWrite>;

    /// Continuous: raise only if active and still below `amount`; appends
    /// to the raise log in the same step.
    async fn apply_raise(
        &self,
        id: &TiebreakerId,
        bidder_id: &BidderId,
        amount: Amount,
        at: DateTime<Utc>,
    ) -> StorageResult<TiebreakerWrite>;

    /// Continuous: a non-leading participant leaves.
    async fn withdraw_participant(
        &self,
        id: &TiebreakerId,
        bidder_id: &BidderId,
        at: DateTime<Utc>,
    ) -> StorageResult<TiebreakerWrite>;

    /// Fixed window: additive duration increase while active.
    async fn extend_tiebreaker(
        &self,
        id: &TiebreakerId,
        minutes: u32,
        at: DateTime<Utc>,
    ) -> StorageResult<TiebreakerWrite>;

    /// `active -> resolved`, exactly once.
    async fn resolve_tiebreaker(
        &self,
        id: &TiebreakerId,
        resolution: TiebreakResolution,
        at: DateTime<Utc>,
    ) -> StorageResult<TiebreakerWrite>;

    /// Raise log in sequence order.
    async fn list_raise_events(&self, id: &TiebreakerId) -> StorageResult<Vec<RaiseEvent>>;
}

/// Storage interface for per-series phase policies.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    async fn put_policy(&self, policy: PhasePolicy) -> StorageResult<()>;
    async fn get_policy(&self, series_id: &SeriesId) -> StorageResult<Option<PhasePolicy>>;
}

/// Storage interface for append-only audit events.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Append an event and return the canonical, hash-linked stored record.
    async fn append_audit(&self, event: AuditAppend) -> StorageResult<AuditRecord>;

    /// Read events newest-first.
    async fn list_audit(&self, window: QueryWindow) -> StorageResult<Vec<AuditRecord>>;

    /// Get the latest audit hash anchor.
    async fn latest_audit_hash(&self) -> StorageResult<Option<String>>;
}

/// Unified storage bundle used by the engine.
pub trait AuctionStorage:
    RoundStore
    + BidStore
    + AccountStore
    + AllocationStore
    + TiebreakerStore
    + PolicyStore
    + AuditStore
    + Send
    + Sync
{
}

impl<T> AuctionStorage for T where
    T: RoundStore
        + BidStore
        + AccountStore
        + AllocationStore
        + TiebreakerStore
        + PolicyStore
        + AuditStore
        + Send
        + Sync
{
}
