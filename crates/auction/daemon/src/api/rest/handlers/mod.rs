//! API request handlers

mod bids;
mod budget;
mod events;
mod health;
mod rounds;
mod tiebreakers;

pub use bids::*;
pub use budget::*;
pub use events::*;
pub use health::*;
pub use rounds::*;
pub use tiebreakers::*;
