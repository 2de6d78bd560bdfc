//! Domain module
//!
//! Core domain types and business rules.

pub mod account;
pub mod amount;
pub mod context;
pub mod error;
pub mod pending;
pub mod transfer;

pub use account::Account;
pub use amount::{Amount, AmountError, Balance};
pub use context::OperationContext;
pub use error::DomainError;
pub use pending::{AbortReason, BranchKind, PendingStatus, PendingTransaction, StatusChange, Vote};
pub use transfer::{SagaState, TransferRecord, TransferSaga};
