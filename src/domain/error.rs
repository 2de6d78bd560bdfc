//! Domain Error Types
//!
//! Pure domain errors that don't depend on infrastructure.

use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use super::amount::AmountError;

/// Domain-specific errors
///
/// These errors represent business rule violations and domain invariant failures.
/// They are independent of the web/infrastructure layer.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DomainError {
    /// Invalid amount (zero, negative, or exceeds limit)
    #[error("Invalid amount: {0}")]
    InvalidAmount(#[from] AmountError),

    /// Account not found
    #[error("Account not found: {0}")]
    AccountNotFound(Uuid),

    /// Insufficient available balance for a debit
    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: Decimal, available: Decimal },

    /// Account id already taken
    #[error("Account already exists: {0}")]
    DuplicateAccount(Uuid),

    /// Commit requested for a branch that was already rolled back
    #[error("Transaction {0} was aborted and cannot be committed")]
    CommitAfterAbort(Uuid),
}

impl DomainError {
    /// Create an insufficient balance error
    pub fn insufficient_balance(required: Decimal, available: Decimal) -> Self {
        Self::InsufficientBalance {
            required,
            available,
        }
    }
}
