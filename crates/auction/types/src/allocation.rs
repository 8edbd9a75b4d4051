//! Allocation and exclusion records
//!
//! Together these are the terminal outcomes of an item within a round.

use crate::{Amount, BidId, BidderId, ItemId, RoundId, TiebreakerId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The permanent record binding one item to one winning bidder.
///
/// At most one allocation exists per item across its whole lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub item_id: ItemId,
    pub bidder_id: BidderId,
    pub price: Amount,
    pub round_id: RoundId,
    pub bid_id: BidId,
    pub source: AllocationSource,
    pub acquired_at: DateTime<Utc>,
}

/// How the winning price was determined
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AllocationSource {
    Direct,
    FixedWindow { tiebreaker_id: TiebreakerId },
    Continuous { tiebreaker_id: TiebreakerId },
}

/// Explicit record that an item stays unallocated in a round
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemExclusion {
    pub round_id: RoundId,
    pub item_id: ItemId,
    pub reason: ExclusionReason,
    pub recorded_at: DateTime<Utc>,
}

/// Why an item was left unallocated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionReason {
    /// Nobody bid on the item
    NoBids,
    /// Every bidder was disqualified by the budget rules
    NoQualifyingBids,
    /// An admin resolved the tiebreaker with `exclude`
    TiebreakerExcluded,
    /// The tiebreaker ended without any tied bidder acting
    TiebreakerUnanswered,
    /// Another round already holds the item
    AlreadyAllocated,
}
