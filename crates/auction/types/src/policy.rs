//! Phase policy and bidder accounts
//!
//! A phase policy is configured per series by an external admin and is
//! read-only while rounds run.

use crate::{Amount, BidderId, SeriesId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One phase: applies to every round up to and including `end_round_number`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseBoundary {
    pub end_round_number: u32,
    pub min_reserve_balance: Amount,
}

/// Reserve schedule for a series
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhasePolicy {
    pub series_id: SeriesId,

    /// Ordered by ascending `end_round_number`
    pub phases: Vec<PhaseBoundary>,

    /// Reserve for every round after the last boundary
    pub terminal_reserve: Amount,

    pub max_items_per_bidder: u32,
}

impl PhasePolicy {
    /// A policy with no reserve and the given item cap.
    pub fn unrestricted(series_id: SeriesId, max_items_per_bidder: u32) -> Self {
        Self {
            series_id,
            phases: Vec::new(),
            terminal_reserve: 0,
            max_items_per_bidder,
        }
    }

    /// Boundaries must be strictly ascending so phases never overlap.
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.max_items_per_bidder == 0 {
            return Err(PolicyError::ZeroItemCap);
        }
        for pair in self.phases.windows(2) {
            if pair[1].end_round_number <= pair[0].end_round_number {
                return Err(PolicyError::UnorderedBoundaries {
                    previous: pair[0].end_round_number,
                    next: pair[1].end_round_number,
                });
            }
        }
        Ok(())
    }

    /// Index of the phase `round_number` falls into; `phases.len()` is the
    /// terminal phase.
    pub fn phase_index(&self, round_number: u32) -> usize {
        self.phases
            .iter()
            .position(|phase| round_number <= phase.end_round_number)
            .unwrap_or(self.phases.len())
    }

    /// Minimum balance a bidder must keep after buying in `round_number`.
    pub fn reserve_for_round(&self, round_number: u32) -> Amount {
        self.phases
            .get(self.phase_index(round_number))
            .map(|phase| phase.min_reserve_balance)
            .unwrap_or(self.terminal_reserve)
    }
}

/// Phase policy validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("phase boundaries must ascend: {previous} is followed by {next}")]
    UnorderedBoundaries { previous: u32, next: u32 },

    #[error("max items per bidder must be at least 1")]
    ZeroItemCap,
}

/// Remaining budget of one bidder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BidderAccount {
    pub bidder_id: BidderId,
    pub balance: Amount,
    pub items_acquired: u32,
    pub updated_at: DateTime<Utc>,
}

impl BidderAccount {
    pub fn new(bidder_id: BidderId, balance: Amount, now: DateTime<Utc>) -> Self {
        Self {
            bidder_id,
            balance,
            items_acquired: 0,
            updated_at: now,
        }
    }
}
