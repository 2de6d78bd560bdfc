//! Transfer records and the coordinator's saga log
//!
//! # Saga States
//!
//! ```text
//! PREPARING ──both PREPARED──▶ COMMITTING ──▶ COMMITTED
//!     │
//!     └──any ABORTED/fault──▶ ABORTING ──▶ ABORTED
//! ```
//!
//! COMMITTING never falls back to ABORTING: once the decision is written,
//! only forward progress is allowed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::amount::Amount;

/// A completed transfer, appended once both branches have committed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRecord {
    pub transfer_id: Uuid,
    pub source_account_id: Uuid,
    pub target_account_id: Uuid,
    pub amount: Amount,
    pub timestamp: DateTime<Utc>,
}

impl TransferRecord {
    /// Whether the account took part in this transfer on either side
    pub fn involves(&self, account_id: Uuid) -> bool {
        self.source_account_id == account_id || self.target_account_id == account_id
    }
}

/// Coordinator-side progress of a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SagaState {
    /// Prepare calls may be in flight; no decision yet
    Preparing,
    /// Decision: commit. Both branches must eventually commit
    Committing,
    /// Terminal: both branches committed and the record appended
    Committed,
    /// Decision: abort. Both branches are being rolled back
    Aborting,
    /// Terminal: both branches rolled back (or never prepared)
    Aborted,
}

impl SagaState {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, SagaState::Committed | SagaState::Aborted)
    }

    /// Whether a transition from `self` to `next` is allowed
    pub fn can_transition_to(&self, next: SagaState) -> bool {
        matches!(
            (self, next),
            (SagaState::Preparing, SagaState::Committing)
                | (SagaState::Preparing, SagaState::Aborting)
                | (SagaState::Committing, SagaState::Committed)
                | (SagaState::Aborting, SagaState::Aborted)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SagaState::Preparing => "PREPARING",
            SagaState::Committing => "COMMITTING",
            SagaState::Committed => "COMMITTED",
            SagaState::Aborting => "ABORTING",
            SagaState::Aborted => "ABORTED",
        }
    }
}

impl fmt::Display for SagaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SagaState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PREPARING" => Ok(SagaState::Preparing),
            "COMMITTING" => Ok(SagaState::Committing),
            "COMMITTED" => Ok(SagaState::Committed),
            "ABORTING" => Ok(SagaState::Aborting),
            "ABORTED" => Ok(SagaState::Aborted),
            other => Err(format!("unknown saga state: {other}")),
        }
    }
}

/// Persistent record of one transfer's two branches and the decision taken
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferSaga {
    pub transfer_id: Uuid,
    pub withdraw_tx_id: Uuid,
    pub deposit_tx_id: Uuid,
    pub source_account_id: Uuid,
    pub target_account_id: Uuid,
    pub amount: Amount,
    pub state: SagaState,
    /// Recovery passes that failed to finish this saga
    pub attempts: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TransferSaga {
    /// Start a saga with fresh, globally unique branch ids
    pub fn begin(source_account_id: Uuid, target_account_id: Uuid, amount: Amount) -> Self {
        let now = Utc::now();
        Self {
            transfer_id: Uuid::new_v4(),
            withdraw_tx_id: Uuid::new_v4(),
            deposit_tx_id: Uuid::new_v4(),
            source_account_id,
            target_account_id,
            amount,
            state: SagaState::Preparing,
            attempts: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// The record appended once both branches have committed
    pub fn to_record(&self, timestamp: DateTime<Utc>) -> TransferRecord {
        TransferRecord {
            transfer_id: self.transfer_id,
            source_account_id: self.source_account_id,
            target_account_id: self.target_account_id,
            amount: self.amount,
            timestamp,
        }
    }
}
