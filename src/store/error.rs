//! Store Error Types
//!
//! One enum covers every way a transactional call can end badly. Repository
//! failures abort the unit of work; only a failed rollback is merged with
//! the error that caused it.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    // === Transaction boundary ===
    #[error("Failed to begin transaction: {0}")]
    Begin(String),

    #[error("Commit failed, outcome indeterminate: {0}")]
    Commit(String),

    #[error("tx err: {tx_err}, rb err: {rollback_err}")]
    Rollback {
        tx_err: Box<StoreError>,
        rollback_err: Box<StoreError>,
    },

    // === Unit of work ===
    #[error("Query failed: {0}")]
    Query(String),

    #[error("Account not found: {0}")]
    AccountNotFound(i64),

    #[error("Balance overflow on account {account_id}: {balance} + {delta}")]
    BalanceOverflow {
        account_id: i64,
        balance: i64,
        delta: i64,
    },

    #[error("Transaction cancelled")]
    Cancelled,
}

impl StoreError {
    /// Merge a failed rollback into the error that triggered it
    pub fn rollback(tx_err: StoreError, rollback_err: StoreError) -> Self {
        StoreError::Rollback {
            tx_err: Box::new(tx_err),
            rollback_err: Box::new(rollback_err),
        }
    }

    /// Stable error code for callers and logs
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::Begin(_) => "TX_BEGIN_FAILED",
            StoreError::Commit(_) => "TX_COMMIT_FAILED",
            StoreError::Rollback { .. } => "TX_ROLLBACK_FAILED",
            StoreError::Query(_) => "QUERY_FAILED",
            StoreError::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            StoreError::BalanceOverflow { .. } => "BALANCE_OVERFLOW",
            StoreError::Cancelled => "CANCELLED",
        }
    }

    /// The error the unit of work failed with (unwraps the rollback merge)
    pub fn tx_error(&self) -> &StoreError {
        match self {
            StoreError::Rollback { tx_err, .. } => tx_err,
            other => other,
        }
    }

    /// The rollback failure, if rollback failed
    pub fn rollback_error(&self) -> Option<&StoreError> {
        match self {
            StoreError::Rollback { rollback_err, .. } => Some(rollback_err),
            _ => None,
        }
    }

    /// Commit failed: the store decides whether the transfer persisted
    pub fn is_indeterminate(&self) -> bool {
        matches!(self, StoreError::Commit(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Query(e.to_string())
    }
}
