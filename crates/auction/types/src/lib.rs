//! Auction Types - core types for the sealed-bid round engine
//!
//! The engine runs timed bidding rounds for scarce items, resolves winners
//! under blind bidding and settles ties through one of two sub-auctions.
//!
//! ## Key Concepts
//!
//! - **Round**: a timed window in which sealed bids are accepted
//! - **Bid**: a sealed (bidder, item, amount) triple, plaintext only after reveal
//! - **Allocation**: the single, permanent owner record of an item
//! - **Tiebreaker**: fixed-window revision round or continuous ascending auction
//! - **PhasePolicy**: reserve-balance schedule across a round series
//! - **Outcome**: resulting state plus an explicit accept/reject tag

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod actor;
pub mod allocation;
pub mod bid;
pub mod events;
pub mod ids;
pub mod outcome;
pub mod policy;
pub mod round;
pub mod tiebreaker;

pub use actor::{Actor, Role};
pub use allocation::{Allocation, AllocationSource, ExclusionReason, ItemExclusion};
pub use bid::{Bid, BidStatus, BidView, SealedPayload};
pub use events::{AuctionEvent, AuctionEventEnvelope, EventSeverity};
pub use ids::{BidId, BidderId, ItemId, RoundId, SeriesId, TiebreakerId};
pub use outcome::{Outcome, OutcomeTag, ReasonCode, Rejection, RejectionKind};
pub use policy::{BidderAccount, PhaseBoundary, PhasePolicy, PolicyError};
pub use round::{
    FinalizationMode, ItemScope, NewRound, Round, RoundMode, RoundStatus, TiebreakKind,
};
pub use tiebreaker::{
    ContinuousParticipant, ContinuousTiebreaker, FixedWindowParticipant, FixedWindowTiebreaker,
    RaiseEvent, ResolveMode, TiebreakResolution, Tiebreaker, TiebreakerStatus,
};

/// Monetary amounts are whole currency units.
pub type Amount = u64;
