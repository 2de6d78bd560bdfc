//! Pending Transactions
//!
//! One branch of a two-phase commit as seen by the ledger.
//!
//! # State Machine
//!
//! ```text
//! PENDING ──commit──▶ COMMITTED
//!    │
//!    └────rollback──▶ ABORTED
//! ```
//!
//! Both terminal states absorb further commit/rollback calls, with one
//! exception: committing an ABORTED branch is a coordinator bug and is
//! reported instead of ignored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::amount::Amount;
use super::error::DomainError;

/// Which side of a transfer a branch represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BranchKind {
    Withdraw,
    Deposit,
}

impl BranchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BranchKind::Withdraw => "WITHDRAW",
            BranchKind::Deposit => "DEPOSIT",
        }
    }
}

impl fmt::Display for BranchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BranchKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "WITHDRAW" => Ok(BranchKind::Withdraw),
            "DEPOSIT" => Ok(BranchKind::Deposit),
            other => Err(format!("unknown branch kind: {other}")),
        }
    }
}

/// Lifecycle status of a branch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PendingStatus {
    Pending,
    Committed,
    Aborted,
}

impl PendingStatus {
    /// Terminal states never transition again
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, PendingStatus::Committed | PendingStatus::Aborted)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PendingStatus::Pending => "PENDING",
            PendingStatus::Committed => "COMMITTED",
            PendingStatus::Aborted => "ABORTED",
        }
    }
}

impl fmt::Display for PendingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PendingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(PendingStatus::Pending),
            "COMMITTED" => Ok(PendingStatus::Committed),
            "ABORTED" => Ok(PendingStatus::Aborted),
            other => Err(format!("unknown pending status: {other}")),
        }
    }
}

/// What a commit or rollback request does to a branch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusChange {
    /// Move the branch to the given terminal state
    Apply(PendingStatus),
    /// Already in a state that satisfies the request
    Ignore,
}

/// A prepared branch recorded by the ledger, keyed by its transaction id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingTransaction {
    pub tx_id: Uuid,
    pub account_id: Uuid,
    pub amount: Amount,
    pub kind: BranchKind,
    pub status: PendingStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl PendingTransaction {
    /// Record a freshly prepared branch
    pub fn new(tx_id: Uuid, account_id: Uuid, amount: Amount, kind: BranchKind) -> Self {
        Self {
            tx_id,
            account_id,
            amount,
            kind,
            status: PendingStatus::Pending,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Whether this branch currently holds back funds from the account
    pub fn is_reservation(&self) -> bool {
        self.kind == BranchKind::Withdraw && self.status == PendingStatus::Pending
    }

    /// Whether a prepare replay carries the same parameters as this branch
    pub fn matches(&self, account_id: Uuid, amount: &Amount, kind: BranchKind) -> bool {
        self.account_id == account_id && &self.amount == amount && self.kind == kind
    }

    /// Transition requested by a commit call
    pub fn on_commit(&self) -> Result<StatusChange, DomainError> {
        match self.status {
            PendingStatus::Pending => Ok(StatusChange::Apply(PendingStatus::Committed)),
            PendingStatus::Committed => Ok(StatusChange::Ignore),
            PendingStatus::Aborted => Err(DomainError::CommitAfterAbort(self.tx_id)),
        }
    }

    /// Transition requested by a rollback call
    pub fn on_rollback(&self) -> StatusChange {
        match self.status {
            PendingStatus::Pending => StatusChange::Apply(PendingStatus::Aborted),
            PendingStatus::Committed | PendingStatus::Aborted => StatusChange::Ignore,
        }
    }
}

/// Why a prepare refused to promise anything
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AbortReason {
    InvalidAmount,
    AccountNotFound,
    InsufficientBalance,
    Conflict,
    /// Replay of a branch that was already rolled back
    Aborted,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AbortReason::InvalidAmount => "invalid amount",
            AbortReason::AccountNotFound => "account not found",
            AbortReason::InsufficientBalance => "insufficient balance",
            AbortReason::Conflict => "conflicting replay",
            AbortReason::Aborted => "branch already aborted",
        };
        f.write_str(s)
    }
}

/// Answer of a prepare call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "vote", content = "reason", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Vote {
    Prepared,
    Aborted(AbortReason),
}

impl Vote {
    pub fn is_prepared(&self) -> bool {
        matches!(self, Vote::Prepared)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn branch(kind: BranchKind) -> PendingTransaction {
        PendingTransaction::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Amount::new(dec!(60)).unwrap(),
            kind,
        )
    }

    #[test]
    fn test_pending_commit_transition() {
        let mut tx = branch(BranchKind::Withdraw);
        assert_eq!(
            tx.on_commit().unwrap(),
            StatusChange::Apply(PendingStatus::Committed)
        );

        tx.status = PendingStatus::Committed;
        assert_eq!(tx.on_commit().unwrap(), StatusChange::Ignore);
        assert_eq!(tx.on_rollback(), StatusChange::Ignore);
    }

    #[test]
    fn test_pending_rollback_transition() {
        let mut tx = branch(BranchKind::Deposit);
        assert_eq!(tx.on_rollback(), StatusChange::Apply(PendingStatus::Aborted));

        tx.status = PendingStatus::Aborted;
        assert_eq!(tx.on_rollback(), StatusChange::Ignore);
        assert!(matches!(
            tx.on_commit(),
            Err(DomainError::CommitAfterAbort(id)) if id == tx.tx_id
        ));
    }

    #[test]
    fn test_terminal_states() {
        assert!(PendingStatus::Committed.is_terminal());
        assert!(PendingStatus::Aborted.is_terminal());
        assert!(!PendingStatus::Pending.is_terminal());
    }

    #[test]
    fn test_only_pending_withdraw_is_reservation() {
        let mut withdraw = branch(BranchKind::Withdraw);
        assert!(withdraw.is_reservation());
        withdraw.status = PendingStatus::Aborted;
        assert!(!withdraw.is_reservation());

        let deposit = branch(BranchKind::Deposit);
        assert!(!deposit.is_reservation());
    }

    #[test]
    fn test_status_string_roundtrip() {
        for status in [
            PendingStatus::Pending,
            PendingStatus::Committed,
            PendingStatus::Aborted,
        ] {
            assert_eq!(status.as_str().parse::<PendingStatus>().unwrap(), status);
        }
        assert!("DONE".parse::<PendingStatus>().is_err());
    }

    #[test]
    fn test_vote_wire_format() {
        let json = serde_json::to_string(&Vote::Prepared).unwrap();
        assert_eq!(json, r#"{"vote":"PREPARED"}"#);

        let json = serde_json::to_string(&Vote::Aborted(AbortReason::InsufficientBalance)).unwrap();
        assert_eq!(json, r#"{"vote":"ABORTED","reason":"INSUFFICIENT_BALANCE"}"#);

        let vote: Vote = serde_json::from_str(&json).unwrap();
        assert_eq!(vote, Vote::Aborted(AbortReason::InsufficientBalance));
    }
}
