//! Auction storage abstractions.
//!
//! This crate defines the storage contract for the round engine:
//! - rounds and their guarded status transitions
//! - sealed bids, keyed by a blind item tag until reveal
//! - bidder accounts with floor-checked debits
//! - the global allocation table (one row per item, ever)
//! - item exclusions, tiebreakers and their raise logs
//! - phase policies per series
//! - an append-only, hash-linked audit chain
//!
//! Every guarded update the engine relies on is a single storage call, so a
//! transactional backend can implement each one as one conditional statement.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]
#![warn(rust_2018_idioms)]

mod error;
pub mod memory;
mod model;
mod traits;

pub use error::{StorageError, StorageResult};
pub use memory::InMemoryAuctionStorage;
pub use model::{
    AllocationCommit, AuditAppend, AuditRecord, BidReveal, BidWrite, BidWriteMode, BidRemoval,
    CommitOutcome, DebitOutcome, ExclusionWrite, RevealOutcome, RoundTransition, SealedBidWrite,
    TiebreakerInsert, TiebreakerWrite,
};
pub use traits::{
    AccountStore, AllocationStore, AuctionStorage, AuditStore, BidStore, PolicyStore, QueryWindow,
    RoundStore, TiebreakerStore,
};
