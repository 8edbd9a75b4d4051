//! Engine error types
//!
//! Only infrastructure faults and broken invariants are errors. Expected
//! business rejections travel as `Outcome` values.

use crate::sealing::SealingError;
use auction_storage::StorageError;
use thiserror::Error;

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Engine errors
#[derive(Debug, Error)]
pub enum EngineError {
    /// A uniqueness or consistency guarantee was found already broken
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("storage error: {0}")]
    Storage(StorageError),

    #[error("sealing error: {0}")]
    Sealing(#[from] SealingError),

    #[error("balance source error: {0}")]
    BalanceSource(String),
}

impl EngineError {
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, EngineError::InvariantViolation(_))
    }
}

impl From<StorageError> for EngineError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::InvariantViolation(detail) => EngineError::InvariantViolation(detail),
            other => EngineError::Storage(other),
        }
    }
}
