//! In-memory ledger store, used when no database is configured and in tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::db::StoreError;
use crate::domain::{Account, Balance, PendingStatus, PendingTransaction};

use super::store::LedgerStore;

#[derive(Default)]
struct Inner {
    accounts: HashMap<Uuid, Account>,
    pending: HashMap<Uuid, PendingTransaction>,
    /// Running total of PENDING withdrawals per account
    reserved: HashMap<Uuid, Decimal>,
}

impl Inner {
    fn release(&mut self, pending: &PendingTransaction) {
        if pending.is_reservation() {
            if let Some(total) = self.reserved.get_mut(&pending.account_id) {
                *total -= pending.amount.value();
            }
        }
    }
}

#[derive(Default)]
pub struct MemoryLedgerStore {
    inner: Mutex<Inner>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A panic while holding the lock leaves plain data behind; keep serving it.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn insert_account(&self, account: &Account) -> Result<(), StoreError> {
        let mut inner = self.inner();
        if inner.accounts.contains_key(&account.id) {
            return Err(StoreError::Duplicate(account.id));
        }
        inner.accounts.insert(account.id, account.clone());
        Ok(())
    }

    async fn get_account(&self, account_id: Uuid) -> Result<Option<Account>, StoreError> {
        Ok(self.inner().accounts.get(&account_id).cloned())
    }

    async fn update_balance(&self, account_id: Uuid, balance: Balance) -> Result<(), StoreError> {
        let mut inner = self.inner();
        let account = inner
            .accounts
            .get_mut(&account_id)
            .ok_or(StoreError::NotFound(account_id))?;
        account.balance = balance;
        Ok(())
    }

    async fn get_pending(&self, tx_id: Uuid) -> Result<Option<PendingTransaction>, StoreError> {
        Ok(self.inner().pending.get(&tx_id).cloned())
    }

    async fn insert_pending(&self, pending: &PendingTransaction) -> Result<(), StoreError> {
        let mut inner = self.inner();
        if inner.pending.contains_key(&pending.tx_id) {
            return Err(StoreError::Duplicate(pending.tx_id));
        }
        if !inner.accounts.contains_key(&pending.account_id) {
            return Err(StoreError::NotFound(pending.account_id));
        }
        if pending.is_reservation() {
            *inner.reserved.entry(pending.account_id).or_default() += pending.amount.value();
        }
        inner.pending.insert(pending.tx_id, pending.clone());
        Ok(())
    }

    async fn reserved_amount(&self, account_id: Uuid) -> Result<Decimal, StoreError> {
        Ok(self
            .inner()
            .reserved
            .get(&account_id)
            .copied()
            .unwrap_or(Decimal::ZERO))
    }

    async fn commit_pending(&self, tx_id: Uuid, balance: Balance) -> Result<(), StoreError> {
        let mut inner = self.inner();
        let pending = inner
            .pending
            .get(&tx_id)
            .cloned()
            .ok_or(StoreError::NotFound(tx_id))?;
        if pending.status != PendingStatus::Pending {
            return Err(StoreError::Conflict(tx_id));
        }
        let account = inner
            .accounts
            .get_mut(&pending.account_id)
            .ok_or(StoreError::NotFound(pending.account_id))?;

        // Both writes happen under one guard, so readers see neither or both.
        account.balance = balance;
        inner.release(&pending);
        if let Some(stored) = inner.pending.get_mut(&tx_id) {
            stored.status = PendingStatus::Committed;
            stored.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn abort_pending(&self, tx_id: Uuid) -> Result<(), StoreError> {
        let mut inner = self.inner();
        let pending = inner
            .pending
            .get(&tx_id)
            .cloned()
            .ok_or(StoreError::NotFound(tx_id))?;
        if pending.status != PendingStatus::Pending {
            return Err(StoreError::Conflict(tx_id));
        }

        inner.release(&pending);
        if let Some(stored) = inner.pending.get_mut(&tx_id) {
            stored.status = PendingStatus::Aborted;
            stored.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn find_stale_pending(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<PendingTransaction>, StoreError> {
        let mut stale: Vec<_> = self
            .inner()
            .pending
            .values()
            .filter(|p| p.status == PendingStatus::Pending && p.created_at < older_than)
            .cloned()
            .collect();
        stale.sort_by_key(|p| p.created_at);
        Ok(stale)
    }
}
