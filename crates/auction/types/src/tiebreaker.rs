//! Tiebreaker types
//!
//! Two flavours share one lifecycle (`active -> resolved`) but run on
//! different clocks:
//! - **Fixed window**: every tied bidder may submit one non-decreasing
//!   revision before `opened_at + duration`.
//! - **Continuous**: an open ascending auction that closes after a period
//!   without raises.

use crate::{Amount, BidId, BidderId, ExclusionReason, ItemId, RoundId, TiebreakerId};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Tiebreaker lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TiebreakerStatus {
    Active,
    Resolved,
}

/// How a tiebreaker ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TiebreakResolution {
    Winner {
        bidder_id: BidderId,
        amount: Amount,
        bid_id: BidId,
    },
    Excluded {
        reason: ExclusionReason,
    },
}

/// Admin/auto resolution mode for a fixed-window tiebreaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolveMode {
    Auto,
    Exclude,
}

// ═══════════════════════════════════════════════════════════════════
// FIXED WINDOW
// ═══════════════════════════════════════════════════════════════════

/// One tied bidder inside a fixed-window tiebreaker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedWindowParticipant {
    pub bidder_id: BidderId,
    pub bid_id: BidId,
    pub previous_amount: Amount,
    pub revised_amount: Option<Amount>,
    pub has_submitted: bool,
    pub submitted_at: Option<DateTime<Utc>>,
}

/// Bounded-duration, single-revision sub-auction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedWindowTiebreaker {
    pub id: TiebreakerId,
    pub round_id: RoundId,
    pub item_id: ItemId,
    pub status: TiebreakerStatus,
    pub tied_amount: Amount,
    pub duration_minutes: u32,
    pub opened_at: DateTime<Utc>,
    pub participants: Vec<FixedWindowParticipant>,
    pub resolution: Option<TiebreakResolution>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl FixedWindowTiebreaker {
    pub fn deadline(&self) -> DateTime<Utc> {
        self.opened_at + Duration::minutes(i64::from(self.duration_minutes))
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.deadline()
    }

    pub fn participant(&self, bidder_id: &BidderId) -> Option<&FixedWindowParticipant> {
        self.participants.iter().find(|p| &p.bidder_id == bidder_id)
    }

    pub fn all_submitted(&self) -> bool {
        self.participants.iter().all(|p| p.has_submitted)
    }

    pub fn submitted_count(&self) -> usize {
        self.participants.iter().filter(|p| p.has_submitted).count()
    }
}

// ═══════════════════════════════════════════════════════════════════
// CONTINUOUS
// ═══════════════════════════════════════════════════════════════════

/// One tied bidder inside a continuous tiebreaker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContinuousParticipant {
    pub bidder_id: BidderId,
    pub bid_id: BidId,
    pub withdrawn: bool,
}

/// Open-ended ascending auction that closes after inactivity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContinuousTiebreaker {
    pub id: TiebreakerId,
    pub round_id: RoundId,
    pub item_id: ItemId,
    pub status: TiebreakerStatus,

    /// Tied amount the auction opened at
    pub opening_amount: Amount,

    pub current_high_amount: Amount,

    /// `None` until the first accepted raise
    pub current_high_bidder: Option<BidderId>,

    pub participants: Vec<ContinuousParticipant>,
    pub inactivity_timeout_secs: u64,
    pub opened_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub resolution: Option<TiebreakResolution>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ContinuousTiebreaker {
    pub fn idle_deadline(&self) -> DateTime<Utc> {
        let secs = i64::try_from(self.inactivity_timeout_secs).unwrap_or(i64::MAX / 1_000);
        self.last_activity_at + Duration::seconds(secs)
    }

    pub fn is_idle(&self, now: DateTime<Utc>) -> bool {
        now > self.idle_deadline()
    }

    pub fn participant(&self, bidder_id: &BidderId) -> Option<&ContinuousParticipant> {
        self.participants.iter().find(|p| &p.bidder_id == bidder_id)
    }

    /// Participants that have not withdrawn.
    pub fn remaining(&self) -> Vec<&ContinuousParticipant> {
        self.participants.iter().filter(|p| !p.withdrawn).collect()
    }
}

/// Append-only log entry for an accepted raise
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaiseEvent {
    pub tiebreaker_id: TiebreakerId,
    pub sequence: u64,
    pub bidder_id: BidderId,
    pub amount: Amount,
    pub at: DateTime<Utc>,
}

// ═══════════════════════════════════════════════════════════════════
// SUM TYPE
// ═══════════════════════════════════════════════════════════════════

/// Either tiebreaker flavour, as stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Tiebreaker {
    FixedWindow(FixedWindowTiebreaker),
    Continuous(ContinuousTiebreaker),
}

impl Tiebreaker {
    pub fn id(&self) -> &TiebreakerId {
        match self {
            Tiebreaker::FixedWindow(t) => &t.id,
            Tiebreaker::Continuous(t) => &t.id,
        }
    }

    pub fn round_id(&self) -> &RoundId {
        match self {
            Tiebreaker::FixedWindow(t) => &t.round_id,
            Tiebreaker::Continuous(t) => &t.round_id,
        }
    }

    pub fn item_id(&self) -> &ItemId {
        match self {
            Tiebreaker::FixedWindow(t) => &t.item_id,
            Tiebreaker::Continuous(t) => &t.item_id,
        }
    }

    pub fn status(&self) -> TiebreakerStatus {
        match self {
            Tiebreaker::FixedWindow(t) => t.status,
            Tiebreaker::Continuous(t) => t.status,
        }
    }

    pub fn resolution(&self) -> Option<&TiebreakResolution> {
        match self {
            Tiebreaker::FixedWindow(t) => t.resolution.as_ref(),
            Tiebreaker::Continuous(t) => t.resolution.as_ref(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status() == TiebreakerStatus::Active
    }

    /// Amount the tied bidders stood at when it opened
    pub fn tied_amount(&self) -> Amount {
        match self {
            Tiebreaker::FixedWindow(t) => t.tied_amount,
            Tiebreaker::Continuous(t) => t.opening_amount,
        }
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        match self {
            Tiebreaker::FixedWindow(t) => t.opened_at,
            Tiebreaker::Continuous(t) => t.opened_at,
        }
    }

    pub fn as_fixed(&self) -> Option<&FixedWindowTiebreaker> {
        match self {
            Tiebreaker::FixedWindow(t) => Some(t),
            Tiebreaker::Continuous(_) => None,
        }
    }

    pub fn as_continuous(&self) -> Option<&ContinuousTiebreaker> {
        match self {
            Tiebreaker::Continuous(t) => Some(t),
            Tiebreaker::FixedWindow(_) => None,
        }
    }
}
