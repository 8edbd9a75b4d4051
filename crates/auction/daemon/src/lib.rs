//! Auction Daemon library
//!
//! Components of the `auctiond` service:
//! - REST surface over the round engine
//! - Deadline poller standing in for the external scheduler
//! - Configuration and server lifecycle

pub mod api;
pub mod config;
pub mod error;
pub mod scheduler;
pub mod server;

pub use config::DaemonConfig;
pub use error::{ApiError, DaemonError};
pub use scheduler::DeadlinePoller;
pub use server::Server;
