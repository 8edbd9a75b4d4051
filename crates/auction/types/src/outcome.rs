//! Outcome tags for mutating operations.
//!
//! Expected business rejections are values, not errors: every mutating
//! operation returns the resulting entity state (when the entity exists)
//! together with an explicit tag.

use serde::{Deserialize, Serialize};

/// Resulting state plus what happened
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome<T> {
    #[serde(flatten)]
    pub tag: OutcomeTag,
    pub state: Option<T>,
}

impl<T> Outcome<T> {
    pub fn accepted(state: T) -> Self {
        Self {
            tag: OutcomeTag::Accepted,
            state: Some(state),
        }
    }

    pub fn replaced(state: T) -> Self {
        Self {
            tag: OutcomeTag::Replaced,
            state: Some(state),
        }
    }

    pub fn no_op(state: T) -> Self {
        Self {
            tag: OutcomeTag::NoOp,
            state: Some(state),
        }
    }

    pub fn rejected(code: ReasonCode, detail: impl Into<String>, state: Option<T>) -> Self {
        Self {
            tag: OutcomeTag::Rejected(Rejection {
                code,
                detail: detail.into(),
            }),
            state,
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self.tag, OutcomeTag::Accepted | OutcomeTag::Replaced)
    }

    pub fn is_no_op(&self) -> bool {
        matches!(self.tag, OutcomeTag::NoOp)
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match &self.tag {
            OutcomeTag::Rejected(rejection) => Some(rejection),
            _ => None,
        }
    }

    /// Reason code of a rejection, if any.
    pub fn code(&self) -> Option<ReasonCode> {
        self.rejection().map(|r| r.code)
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        Outcome {
            tag: self.tag,
            state: self.state.map(f),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum OutcomeTag {
    Accepted,
    /// An existing record was overwritten in place (bid revision)
    Replaced,
    /// Idempotent repeat; nothing changed
    NoOp,
    Rejected(Rejection),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub code: ReasonCode,
    pub detail: String,
}

impl Rejection {
    pub fn kind(&self) -> RejectionKind {
        self.code.kind()
    }
}

/// Error taxonomy class of a rejection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionKind {
    Validation,
    BusinessRule,
    ConcurrencyConflict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    // Validation
    UnknownRound,
    UnknownItem,
    UnknownBid,
    UnknownTiebreaker,
    AmountBelowFloor,
    InvalidWindow,
    InvalidRound,
    InvalidPolicy,
    NotExtendable,

    // Business rules
    RoundNotActive,
    RoundNotClosed,
    BidCapReached,
    ReserveBreach,
    ItemCapReached,
    RevisionBelowTiedAmount,
    AlreadySubmitted,
    TiebreakerNotActive,
    WindowExpired,
    BelowCurrentHigh,
    NotParticipant,
    LeaderCannotWithdraw,
    Unauthorized,

    // Concurrency
    LostRace,
}

impl ReasonCode {
    pub fn kind(&self) -> RejectionKind {
        match self {
            ReasonCode::UnknownRound
            | ReasonCode::UnknownItem
            | ReasonCode::UnknownBid
            | ReasonCode::UnknownTiebreaker
            | ReasonCode::AmountBelowFloor
            | ReasonCode::InvalidWindow
            | ReasonCode::InvalidRound
            | ReasonCode::InvalidPolicy
            | ReasonCode::NotExtendable => RejectionKind::Validation,
            ReasonCode::LostRace => RejectionKind::ConcurrencyConflict,
            _ => RejectionKind::BusinessRule,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_serializes_flat() {
        let outcome: Outcome<u32> =
            Outcome::rejected(ReasonCode::ReserveBreach, "leaves 50 < 100", Some(7));
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["outcome"], "rejected");
        assert_eq!(json["code"], "reserve_breach");
        assert_eq!(json["state"], 7);
    }

    #[test]
    fn test_reason_kinds() {
        assert_eq!(ReasonCode::AmountBelowFloor.kind(), RejectionKind::Validation);
        assert_eq!(ReasonCode::BidCapReached.kind(), RejectionKind::BusinessRule);
        assert_eq!(ReasonCode::LostRace.kind(), RejectionKind::ConcurrencyConflict);
    }

    #[test]
    fn test_replaced_counts_as_accepted() {
        let outcome = Outcome::replaced(1u8);
        assert!(outcome.is_accepted());
        assert!(outcome.rejection().is_none());
    }
}
