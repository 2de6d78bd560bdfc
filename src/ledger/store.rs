//! Ledger Store
//!
//! Persistence contract for accounts and pending transactions. Each method is
//! atomic on its own; read-then-write sequences are serialized by the
//! service's per-account locks, not by the store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::db::StoreError;
use crate::domain::{Account, Balance, PendingTransaction};

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Insert a new account. `StoreError::Duplicate` if the id is taken.
    async fn insert_account(&self, account: &Account) -> Result<(), StoreError>;

    async fn get_account(&self, account_id: Uuid) -> Result<Option<Account>, StoreError>;

    /// Overwrite the committed balance of an account
    async fn update_balance(&self, account_id: Uuid, balance: Balance) -> Result<(), StoreError>;

    async fn get_pending(&self, tx_id: Uuid) -> Result<Option<PendingTransaction>, StoreError>;

    /// Record a prepared branch. `StoreError::Duplicate` if the tx id exists.
    async fn insert_pending(&self, pending: &PendingTransaction) -> Result<(), StoreError>;

    /// Sum of PENDING withdrawal reservations held against the account
    async fn reserved_amount(&self, account_id: Uuid) -> Result<Decimal, StoreError>;

    /// Write the new balance and flip the branch PENDING → COMMITTED as one
    /// unit. `StoreError::Conflict` if the branch is no longer PENDING.
    async fn commit_pending(&self, tx_id: Uuid, balance: Balance) -> Result<(), StoreError>;

    /// Flip the branch PENDING → ABORTED. `StoreError::Conflict` if the
    /// branch is no longer PENDING.
    async fn abort_pending(&self, tx_id: Uuid) -> Result<(), StoreError>;

    /// PENDING branches created before `older_than`, oldest first
    async fn find_stale_pending(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<PendingTransaction>, StoreError>;
}
