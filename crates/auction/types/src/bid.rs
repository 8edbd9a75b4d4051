//! Sealed bid types

use crate::{Amount, BidId, BidderId, ItemId, RoundId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A bid as stored by the engine.
///
/// Until the round is revealed only `item_tag` (a keyed blind index of the
/// item) and the opaque `sealed_payload` are populated; `item_id` and
/// `revealed_amount` stay empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bid {
    pub id: BidId,
    pub round_id: RoundId,
    pub bidder_id: BidderId,
    pub item_tag: String,
    pub item_id: Option<ItemId>,
    pub sealed_payload: SealedPayload,
    pub revealed_amount: Option<Amount>,
    pub status: BidStatus,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Bid {
    pub fn is_active(&self) -> bool {
        self.status == BidStatus::Active
    }

    pub fn is_revealed(&self) -> bool {
        self.revealed_amount.is_some()
    }
}

/// Bid status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BidStatus {
    Active,
    Won,
    Lost,
}

/// Authenticated ciphertext binding an item id and an amount
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedPayload {
    pub nonce: [u8; 16],
    pub ciphertext: Vec<u8>,
    pub mac: [u8; 32],
}

/// What any party, including the bidder, may read about a bid.
///
/// Item and amount are withheld until the round has been revealed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BidView {
    pub id: BidId,
    pub round_id: RoundId,
    pub bidder_id: BidderId,
    pub status: BidStatus,
    pub sealed: bool,
    pub item_id: Option<ItemId>,
    pub amount: Option<Amount>,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Bid> for BidView {
    fn from(bid: &Bid) -> Self {
        let sealed = !bid.is_revealed();
        Self {
            id: bid.id.clone(),
            round_id: bid.round_id.clone(),
            bidder_id: bid.bidder_id.clone(),
            status: bid.status,
            sealed,
            item_id: if sealed { None } else { bid.item_id.clone() },
            amount: bid.revealed_amount,
            submitted_at: bid.submitted_at,
            updated_at: bid.updated_at,
        }
    }
}
