use auction_types::{
    Allocation, Amount, Bid, BidId, BidderAccount, BidderId, ItemExclusion, ItemId, ReasonCode,
    Round, RoundId, RoundStatus, SealedPayload, Tiebreaker,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Result of a guarded round status transition.
#[derive(Debug, Clone)]
pub enum RoundTransition {
    /// This caller moved the round out of `from`
    Applied { from: RoundStatus, round: Round },
    /// The round was no longer in an expected status; nothing changed
    Stale(Round),
}

impl RoundTransition {
    pub fn round(&self) -> &Round {
        match self {
            RoundTransition::Applied { round, .. } => round,
            RoundTransition::Stale(round) => round,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, RoundTransition::Applied { .. })
    }
}

/// Whether a sealed write creates a bid or overwrites a known one
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BidWriteMode {
    /// Insert, or replace the active bid with the same item tag
    Submit,
    /// Replace only the named bid
    Revise { bid_id: BidId },
}

/// Sealed bid write. The round window and per-bidder cap are checked by
/// storage under the same guard as the write.
#[derive(Debug, Clone)]
pub struct SealedBidWrite {
    pub round_id: RoundId,
    pub bidder_id: BidderId,
    pub item_tag: String,
    pub sealed_payload: SealedPayload,
    pub mode: BidWriteMode,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum BidWrite {
    Inserted(Bid),
    Replaced(Bid),
    Rejected(ReasonCode),
}

#[derive(Debug, Clone)]
pub enum BidRemoval {
    Removed(Bid),
    Rejected(ReasonCode),
}

/// Plaintext for one sealed bid, produced by the engine at reveal time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BidReveal {
    pub bid_id: BidId,
    pub item_id: ItemId,
    pub amount: Amount,
}

#[derive(Debug, Clone)]
pub enum RevealOutcome {
    /// This call turned the round's bids into plaintext
    Revealed(Vec<Bid>),
    /// Reveal already happened; the stored plaintext is returned untouched
    AlreadyRevealed(Vec<Bid>),
}

impl RevealOutcome {
    pub fn bids(&self) -> &[Bid] {
        match self {
            RevealOutcome::Revealed(bids) | RevealOutcome::AlreadyRevealed(bids) => bids,
        }
    }

    pub fn into_bids(self) -> Vec<Bid> {
        match self {
            RevealOutcome::Revealed(bids) | RevealOutcome::AlreadyRevealed(bids) => bids,
        }
    }
}

#[derive(Debug, Clone)]
pub enum DebitOutcome {
    Applied(BidderAccount),
    Rejected {
        code: ReasonCode,
        account: BidderAccount,
    },
}

/// Everything the allocation transaction writes or checks.
#[derive(Debug, Clone)]
pub struct AllocationCommit {
    pub allocation: Allocation,

    /// Balance the winner must keep after paying
    pub reserve_floor: Amount,

    /// Max items the winner may hold after this allocation
    pub max_items: u32,
}

#[derive(Debug, Clone)]
pub enum CommitOutcome {
    /// Allocation inserted, budget debited, winning bid won, other bids lost
    Committed {
        allocation: Allocation,
        account: BidderAccount,
    },
    /// The commit-time budget re-check failed; nothing was written
    BudgetRejected {
        code: ReasonCode,
        account: BidderAccount,
    },
    /// A concurrent run of the same round allocated the item first
    AlreadyAllocated(Allocation),
    /// A concurrent run of the same round excluded the item first
    AlreadyExcluded(ItemExclusion),
    /// A different round holds the item. Nothing was written.
    HeldElsewhere(Allocation),
}

#[derive(Debug, Clone)]
pub enum ExclusionWrite {
    Recorded(ItemExclusion),
    Existing(ItemExclusion),
    /// The round allocated the item before the exclusion landed
    Allocated(Allocation),
}

#[derive(Debug, Clone)]
pub enum TiebreakerInsert {
    Opened(Tiebreaker),
    /// A tiebreaker already exists for the (round, item) pair
    Existing(Tiebreaker),
}

/// Result of a guarded tiebreaker update.
#[derive(Debug, Clone)]
pub enum TiebreakerWrite {
    Applied(Tiebreaker),
    Rejected {
        code: ReasonCode,
        current: Tiebreaker,
    },
}

/// Audit append payload. Hashes and sequencing are assigned by storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditAppend {
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub stage: String,
    pub round_id: Option<RoundId>,
    pub message: String,
    #[serde(default)]
    pub payload: Value,
}

/// Persistent tamper-evident audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub event_id: String,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub stage: String,
    pub round_id: Option<RoundId>,
    pub message: String,
    pub payload: Value,
    pub previous_hash: Option<String>,
    pub hash: String,
}
