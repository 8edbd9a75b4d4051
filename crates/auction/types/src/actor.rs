//! Caller identity as handed over by the identity collaborator.
//!
//! Authentication happens upstream; the engine only checks that the role
//! matches the operation and that bidders act for themselves.

use crate::BidderId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Bidder,
    Admin,
    Scheduler,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub bidder_id: Option<BidderId>,
    pub role: Role,
}

impl Actor {
    pub fn bidder(bidder_id: BidderId) -> Self {
        Self {
            bidder_id: Some(bidder_id),
            role: Role::Bidder,
        }
    }

    pub fn admin() -> Self {
        Self {
            bidder_id: None,
            role: Role::Admin,
        }
    }

    pub fn scheduler() -> Self {
        Self {
            bidder_id: None,
            role: Role::Scheduler,
        }
    }

    /// Admins and the scheduler may drive lifecycle operations.
    pub fn is_operator(&self) -> bool {
        matches!(self.role, Role::Admin | Role::Scheduler)
    }

    pub fn acts_for(&self, bidder_id: &BidderId) -> bool {
        self.role == Role::Bidder && self.bidder_id.as_ref() == Some(bidder_id)
    }

    /// Label used in audit records and event envelopes.
    pub fn label(&self) -> String {
        match (&self.role, &self.bidder_id) {
            (Role::Bidder, Some(id)) => id.to_string(),
            (Role::Bidder, None) => "bidder:unknown".to_string(),
            (Role::Admin, _) => "admin".to_string(),
            (Role::Scheduler, _) => "scheduler".to_string(),
        }
    }
}
