//! Event types for round and tiebreaker state changes
//!
//! Events are broadcast fire-and-forget and mirrored into the audit log.
//! Sealed amounts never appear in an event before reveal.

use crate::{
    Amount, BidId, BidderId, ExclusionReason, ItemId, RoundId, RoundStatus, TiebreakKind,
    TiebreakerId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Envelope wrapping all auction events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuctionEventEnvelope {
    /// Unique event ID
    pub id: Uuid,

    /// Event timestamp
    pub timestamp: DateTime<Utc>,

    /// Event severity
    pub severity: EventSeverity,

    /// Actor who triggered the event
    pub actor: Option<String>,

    /// The actual event
    pub event: AuctionEvent,
}

/// Event severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventSeverity {
    /// Informational event
    Info,
    /// Warning event
    Warning,
    /// Critical event requiring immediate attention
    Critical,
}

/// Auction events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AuctionEvent {
    // ═══════════════════════════════════════════════════════════════════
    // ROUND EVENTS
    // ═══════════════════════════════════════════════════════════════════
    RoundCreated {
        round_id: RoundId,
        round_number: u32,
        closes_at: DateTime<Utc>,
    },

    RoundClosed {
        round_id: RoundId,
    },

    BidsRevealed {
        round_id: RoundId,
        count: usize,
    },

    RoundStatusChanged {
        round_id: RoundId,
        from: RoundStatus,
        to: RoundStatus,
    },

    RoundExtended {
        round_id: RoundId,
        closes_at: DateTime<Utc>,
    },

    RoundCancelled {
        round_id: RoundId,
        from: RoundStatus,
    },

    // ═══════════════════════════════════════════════════════════════════
    // BID EVENTS
    // ═══════════════════════════════════════════════════════════════════
    BidAccepted {
        round_id: RoundId,
        bid_id: BidId,
        bidder_id: BidderId,
    },

    BidReplaced {
        round_id: RoundId,
        bid_id: BidId,
        bidder_id: BidderId,
    },

    BidWithdrawn {
        round_id: RoundId,
        bid_id: BidId,
        bidder_id: BidderId,
    },

    // ═══════════════════════════════════════════════════════════════════
    // RESOLUTION EVENTS
    // ═══════════════════════════════════════════════════════════════════
    ItemAllocated {
        round_id: RoundId,
        item_id: ItemId,
        bidder_id: BidderId,
        price: Amount,
    },

    ItemExcluded {
        round_id: RoundId,
        item_id: ItemId,
        reason: ExclusionReason,
    },

    BidderDisqualified {
        round_id: RoundId,
        item_id: ItemId,
        bidder_id: BidderId,
        reason: String,
    },

    // ═══════════════════════════════════════════════════════════════════
    // TIEBREAKER EVENTS
    // ═══════════════════════════════════════════════════════════════════
    TiebreakerOpened {
        round_id: RoundId,
        tiebreaker_id: TiebreakerId,
        item_id: ItemId,
        kind: TiebreakKind,
        tied_amount: Amount,
        participants: Vec<BidderId>,
    },

    RevisionSubmitted {
        tiebreaker_id: TiebreakerId,
        bidder_id: BidderId,
    },

    RaiseAccepted {
        tiebreaker_id: TiebreakerId,
        bidder_id: BidderId,
        amount: Amount,
    },

    ParticipantWithdrew {
        tiebreaker_id: TiebreakerId,
        bidder_id: BidderId,
    },

    TiebreakerExtended {
        tiebreaker_id: TiebreakerId,
        duration_minutes: u32,
    },

    TiebreakerResolved {
        round_id: RoundId,
        tiebreaker_id: TiebreakerId,
        item_id: ItemId,
        winner: Option<BidderId>,
    },

    // ═══════════════════════════════════════════════════════════════════
    // FAULTS
    // ═══════════════════════════════════════════════════════════════════
    InvariantViolated {
        round_id: Option<RoundId>,
        detail: String,
    },
}

impl AuctionEvent {
    /// Short stage label used in audit records.
    pub fn stage(&self) -> &'static str {
        match self {
            AuctionEvent::RoundCreated { .. } => "round_created",
            AuctionEvent::RoundClosed { .. } => "round_closed",
            AuctionEvent::BidsRevealed { .. } => "bids_revealed",
            AuctionEvent::RoundStatusChanged { .. } => "round_status_changed",
            AuctionEvent::RoundExtended { .. } => "round_extended",
            AuctionEvent::RoundCancelled { .. } => "round_cancelled",
            AuctionEvent::BidAccepted { .. } => "bid_accepted",
            AuctionEvent::BidReplaced { .. } => "bid_replaced",
            AuctionEvent::BidWithdrawn { .. } => "bid_withdrawn",
            AuctionEvent::ItemAllocated { .. } => "item_allocated",
            AuctionEvent::ItemExcluded { .. } => "item_excluded",
            AuctionEvent::BidderDisqualified { .. } => "bidder_disqualified",
            AuctionEvent::TiebreakerOpened { .. } => "tiebreaker_opened",
            AuctionEvent::RevisionSubmitted { .. } => "revision_submitted",
            AuctionEvent::RaiseAccepted { .. } => "raise_accepted",
            AuctionEvent::ParticipantWithdrew { .. } => "participant_withdrew",
            AuctionEvent::TiebreakerExtended { .. } => "tiebreaker_extended",
            AuctionEvent::TiebreakerResolved { .. } => "tiebreaker_resolved",
            AuctionEvent::InvariantViolated { .. } => "invariant_violated",
        }
    }

    /// Round the event belongs to, when it names one directly.
    pub fn round_id(&self) -> Option<&RoundId> {
        match self {
            AuctionEvent::RoundCreated { round_id, .. }
            | AuctionEvent::RoundClosed { round_id }
            | AuctionEvent::BidsRevealed { round_id, .. }
            | AuctionEvent::RoundStatusChanged { round_id, .. }
            | AuctionEvent::RoundExtended { round_id, .. }
            | AuctionEvent::RoundCancelled { round_id, .. }
            | AuctionEvent::BidAccepted { round_id, .. }
            | AuctionEvent::BidReplaced { round_id, .. }
            | AuctionEvent::BidWithdrawn { round_id, .. }
            | AuctionEvent::ItemAllocated { round_id, .. }
            | AuctionEvent::ItemExcluded { round_id, .. }
            | AuctionEvent::BidderDisqualified { round_id, .. }
            | AuctionEvent::TiebreakerOpened { round_id, .. }
            | AuctionEvent::TiebreakerResolved { round_id, .. } => Some(round_id),
            AuctionEvent::InvariantViolated { round_id, .. } => round_id.as_ref(),
            AuctionEvent::RevisionSubmitted { .. }
            | AuctionEvent::RaiseAccepted { .. }
            | AuctionEvent::ParticipantWithdrew { .. }
            | AuctionEvent::TiebreakerExtended { .. } => None,
        }
    }
}

impl AuctionEventEnvelope {
    /// Create a new event envelope
    pub fn new(event: AuctionEvent, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp,
            severity: Self::infer_severity(&event),
            actor: None,
            event,
        }
    }

    /// Create with actor
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    fn infer_severity(event: &AuctionEvent) -> EventSeverity {
        match event {
            AuctionEvent::InvariantViolated { .. } => EventSeverity::Critical,

            AuctionEvent::BidderDisqualified { .. }
            | AuctionEvent::ItemExcluded { .. }
            | AuctionEvent::RoundCancelled { .. } => EventSeverity::Warning,

            _ => EventSeverity::Info,
        }
    }
}
