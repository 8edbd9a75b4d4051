//! Round types
//!
//! A round is created by the external scheduler and mutated only by the
//! lifecycle controller. Rounds are never deleted.

use crate::{ItemId, RoundId, SeriesId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A timed window in which sealed bids are accepted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Round {
    pub id: RoundId,

    /// Series this round belongs to (selects the phase policy)
    pub series_id: SeriesId,

    /// Position within the series, drives phase lookup
    pub round_number: u32,

    pub mode: RoundMode,
    pub item_scope: ItemScope,
    pub status: RoundStatus,
    pub opens_at: DateTime<Utc>,

    /// Mutable only by additive extension
    pub closes_at: DateTime<Utc>,

    pub max_bids_per_bidder: u32,
    pub finalization_mode: FinalizationMode,
    pub tiebreak_kind: TiebreakKind,

    /// Set exactly once, when sealed bids are turned into plaintext
    pub revealed_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Round {
    /// Build a fresh `active` round from a creation request.
    pub fn from_request(request: NewRound, now: DateTime<Utc>) -> Self {
        let tiebreak_kind = request
            .tiebreak_kind
            .unwrap_or_else(|| TiebreakKind::default_for(request.mode));
        Self {
            id: RoundId::generate(),
            series_id: request.series_id,
            round_number: request.round_number,
            mode: request.mode,
            item_scope: request.item_scope,
            status: RoundStatus::Active,
            opens_at: request.opens_at,
            closes_at: request.closes_at,
            max_bids_per_bidder: request.max_bids_per_bidder,
            finalization_mode: request.finalization_mode,
            tiebreak_kind,
            revealed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Items this round must settle before it can complete.
    pub fn items(&self) -> &[ItemId] {
        self.item_scope.items()
    }

    pub fn in_scope(&self, item_id: &ItemId) -> bool {
        self.items().contains(item_id)
    }

    /// Whether a bid arriving at `now` falls inside the open window.
    pub fn accepts_bids_at(&self, now: DateTime<Utc>) -> bool {
        self.status == RoundStatus::Active && now >= self.opens_at && now < self.closes_at
    }

    pub fn is_revealed(&self) -> bool {
        self.revealed_at.is_some()
    }
}

/// Round creation request from the external scheduler
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRound {
    pub series_id: SeriesId,
    pub round_number: u32,
    pub mode: RoundMode,
    pub item_scope: ItemScope,
    pub opens_at: DateTime<Utc>,
    pub closes_at: DateTime<Utc>,
    pub max_bids_per_bidder: u32,
    #[serde(default)]
    pub finalization_mode: FinalizationMode,
    #[serde(default)]
    pub tiebreak_kind: Option<TiebreakKind>,
}

/// Single-item or multi-item round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundMode {
    Single,
    Bulk,
}

/// Items a round covers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ItemScope {
    /// Exactly one item
    Single { item_id: ItemId },

    /// All items of a category, snapshotted when the round was created
    Category { category: String, items: Vec<ItemId> },
}

impl ItemScope {
    pub fn items(&self) -> &[ItemId] {
        match self {
            ItemScope::Single { item_id } => std::slice::from_ref(item_id),
            ItemScope::Category { items, .. } => items,
        }
    }
}

/// Round lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundStatus {
    Active,
    Finalizing,
    Tiebreaker,
    Completed,
    Cancelled,
}

impl RoundStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RoundStatus::Completed | RoundStatus::Cancelled)
    }

    /// Statuses in which resolution work may still happen.
    pub fn is_resolving(&self) -> bool {
        matches!(self, RoundStatus::Finalizing | RoundStatus::Tiebreaker)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RoundStatus::Active => "active",
            RoundStatus::Finalizing => "finalizing",
            RoundStatus::Tiebreaker => "tiebreaker",
            RoundStatus::Completed => "completed",
            RoundStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for RoundStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether closing a round resolves it immediately or waits for an admin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalizationMode {
    #[default]
    Auto,
    Manual,
}

/// Sub-auction used when bidders tie at the top amount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TiebreakKind {
    FixedWindow,
    Continuous,
}

impl TiebreakKind {
    pub fn default_for(mode: RoundMode) -> Self {
        match mode {
            RoundMode::Single => TiebreakKind::FixedWindow,
            RoundMode::Bulk => TiebreakKind::Continuous,
        }
    }
}
