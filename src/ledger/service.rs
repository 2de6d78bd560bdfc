//! Ledger Service
//!
//! Owns account balances and the pending-transaction log. Every operation
//! that reads an account and then writes it runs under that account's lock.
//!
//! A prepared withdrawal is a reservation: it is subtracted from the balance
//! any later prepare or direct withdrawal on the same account is checked
//! against, so the matching commit can always apply the debit.

use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::db::StoreError;
use crate::domain::{
    AbortReason, Account, Amount, Balance, BranchKind, DomainError, PendingTransaction,
    StatusChange, Vote,
};
use crate::notify::{Notification, NotificationKind, Notifier};

use super::locks::AccountLocks;
use super::store::LedgerStore;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// Stored state contradicts a guarantee the ledger made earlier
    #[error("Ledger invariant violated: {0}")]
    Invariant(String),
}

impl LedgerError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Store(e) if e.is_retryable())
    }
}

impl From<crate::domain::AmountError> for LedgerError {
    fn from(err: crate::domain::AmountError) -> Self {
        LedgerError::Domain(DomainError::InvalidAmount(err))
    }
}

pub struct LedgerService {
    store: Arc<dyn LedgerStore>,
    locks: AccountLocks,
    notifier: Arc<dyn Notifier>,
}

impl LedgerService {
    pub fn new(store: Arc<dyn LedgerStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            store,
            locks: AccountLocks::new(),
            notifier,
        }
    }

    // =========================================================================
    // Accounts
    // =========================================================================

    /// Register an account with a zero balance
    pub async fn open_account(
        &self,
        account_id: Uuid,
        owner_name: &str,
        email: &str,
    ) -> Result<Account, LedgerError> {
        let account = Account::open(account_id, owner_name, email);

        match self.store.insert_account(&account).await {
            Ok(()) => {
                tracing::info!(account_id = %account_id, "Account opened");
                Ok(account)
            }
            Err(StoreError::Duplicate(id)) => Err(DomainError::DuplicateAccount(id).into()),
            Err(e) => Err(e.into()),
        }
    }

    // =========================================================================
    // Two-phase commit: prepare
    // =========================================================================

    /// Reserve `amount` on the account for a later commit
    pub async fn prepare_withdraw(
        &self,
        tx_id: Uuid,
        account_id: Uuid,
        amount: Decimal,
    ) -> Result<Vote, LedgerError> {
        self.prepare(tx_id, account_id, amount, BranchKind::Withdraw)
            .await
    }

    /// Record a credit to apply at commit. Never fails on balance grounds.
    pub async fn prepare_deposit(
        &self,
        tx_id: Uuid,
        account_id: Uuid,
        amount: Decimal,
    ) -> Result<Vote, LedgerError> {
        self.prepare(tx_id, account_id, amount, BranchKind::Deposit)
            .await
    }

    async fn prepare(
        &self,
        tx_id: Uuid,
        account_id: Uuid,
        amount: Decimal,
        kind: BranchKind,
    ) -> Result<Vote, LedgerError> {
        let amount = match Amount::new(amount) {
            Ok(amount) => amount,
            Err(e) => {
                tracing::info!(tx_id = %tx_id, kind = %kind, error = %e, "Prepare rejected");
                return Ok(Vote::Aborted(AbortReason::InvalidAmount));
            }
        };

        let _guard = self.locks.lock(account_id).await;

        if let Some(existing) = self.store.get_pending(tx_id).await? {
            return Ok(replay_vote(&existing, account_id, &amount, kind));
        }

        let Some(account) = self.store.get_account(account_id).await? else {
            return Ok(self.abort_vote(tx_id, kind, AbortReason::AccountNotFound));
        };

        match kind {
            BranchKind::Withdraw => {
                let reserved = self.store.reserved_amount(account_id).await?;
                let available = account.balance.available(reserved);
                if available < amount.value() {
                    tracing::info!(
                        tx_id = %tx_id,
                        account_id = %account_id,
                        amount = %amount,
                        available = %available,
                        "Insufficient available balance"
                    );
                    return Ok(Vote::Aborted(AbortReason::InsufficientBalance));
                }
            }
            BranchKind::Deposit => {
                if account.balance.credit(&amount).is_err() {
                    return Ok(self.abort_vote(tx_id, kind, AbortReason::InvalidAmount));
                }
            }
        }

        let pending = PendingTransaction::new(tx_id, account_id, amount, kind);
        match self.store.insert_pending(&pending).await {
            Ok(()) => {}
            // Same id raced in on another account's lock
            Err(StoreError::Duplicate(_)) => {
                return Ok(match self.store.get_pending(tx_id).await? {
                    Some(existing) => replay_vote(&existing, account_id, &amount, kind),
                    None => Vote::Aborted(AbortReason::Conflict),
                });
            }
            Err(StoreError::NotFound(_)) => {
                return Ok(self.abort_vote(tx_id, kind, AbortReason::AccountNotFound));
            }
            Err(e) => return Err(e.into()),
        }

        tracing::info!(
            tx_id = %tx_id,
            account_id = %account_id,
            kind = %kind,
            amount = %amount,
            "Branch prepared"
        );
        Ok(Vote::Prepared)
    }

    fn abort_vote(&self, tx_id: Uuid, kind: BranchKind, reason: AbortReason) -> Vote {
        tracing::info!(tx_id = %tx_id, kind = %kind, reason = %reason, "Prepare aborted");
        Vote::Aborted(reason)
    }

    // =========================================================================
    // Two-phase commit: decision
    // =========================================================================

    /// Apply a prepared branch to the balance.
    ///
    /// Unknown and already committed ids are a no-op. Committing an aborted
    /// branch is reported as `DomainError::CommitAfterAbort`.
    pub async fn commit(&self, tx_id: Uuid) -> Result<(), LedgerError> {
        let Some(pending) = self.store.get_pending(tx_id).await? else {
            tracing::debug!(tx_id = %tx_id, "Commit for unknown transaction ignored");
            return Ok(());
        };
        if pending.on_commit()? == StatusChange::Ignore {
            return Ok(());
        }

        let _guard = self.locks.lock(pending.account_id).await;

        // Re-read: a concurrent commit or rollback may have won the lock first
        let pending = self
            .store
            .get_pending(tx_id)
            .await?
            .ok_or_else(|| LedgerError::Invariant(format!("transaction {} vanished", tx_id)))?;
        if pending.on_commit()? == StatusChange::Ignore {
            return Ok(());
        }

        let account = self
            .store
            .get_account(pending.account_id)
            .await?
            .ok_or_else(|| {
                LedgerError::Invariant(format!(
                    "account {} missing for transaction {}",
                    pending.account_id, tx_id
                ))
            })?;

        let new_balance = match pending.kind {
            BranchKind::Withdraw => account.balance.debit(&pending.amount),
            BranchKind::Deposit => account.balance.credit(&pending.amount),
        }
        .map_err(|e| {
            LedgerError::Invariant(format!("prepared transaction {} cannot apply: {}", tx_id, e))
        })?;

        self.store.commit_pending(tx_id, new_balance).await?;

        tracing::info!(
            tx_id = %tx_id,
            account_id = %pending.account_id,
            kind = %pending.kind,
            amount = %pending.amount,
            balance = %new_balance,
            "Branch committed"
        );
        self.notify(&account, pending.kind.into(), &pending.amount);

        Ok(())
    }

    /// Release a prepared branch without touching the balance.
    /// No-op unless the branch is PENDING.
    pub async fn rollback(&self, tx_id: Uuid) -> Result<(), LedgerError> {
        let Some(pending) = self.store.get_pending(tx_id).await? else {
            tracing::debug!(tx_id = %tx_id, "Rollback for unknown transaction ignored");
            return Ok(());
        };
        if pending.on_rollback() == StatusChange::Ignore {
            return Ok(());
        }

        let _guard = self.locks.lock(pending.account_id).await;

        let still_pending = self
            .store
            .get_pending(tx_id)
            .await?
            .map(|p| p.on_rollback() != StatusChange::Ignore)
            .unwrap_or(false);
        if !still_pending {
            return Ok(());
        }

        self.store.abort_pending(tx_id).await?;

        tracing::info!(
            tx_id = %tx_id,
            account_id = %pending.account_id,
            kind = %pending.kind,
            "Branch rolled back"
        );
        Ok(())
    }

    // =========================================================================
    // Direct single-phase operations
    // =========================================================================

    pub async fn deposit(&self, account_id: Uuid, amount: Decimal) -> Result<Balance, LedgerError> {
        let amount = Amount::new(amount)?;
        let _guard = self.locks.lock(account_id).await;

        let account = self.load_account(account_id).await?;
        let new_balance = account.balance.credit(&amount)?;
        self.store.update_balance(account_id, new_balance).await?;

        tracing::info!(account_id = %account_id, amount = %amount, balance = %new_balance, "Deposit");
        self.notify(&account, NotificationKind::Deposit, &amount);

        Ok(new_balance)
    }

    /// Withdraw directly. Outstanding reservations are not available.
    pub async fn withdraw(&self, account_id: Uuid, amount: Decimal) -> Result<Balance, LedgerError> {
        let amount = Amount::new(amount)?;
        let _guard = self.locks.lock(account_id).await;

        let account = self.load_account(account_id).await?;
        let reserved = self.store.reserved_amount(account_id).await?;
        let available = account.balance.available(reserved);
        if available < amount.value() {
            return Err(DomainError::insufficient_balance(amount.value(), available).into());
        }

        let new_balance = account.balance.debit(&amount)?;
        self.store.update_balance(account_id, new_balance).await?;

        tracing::info!(account_id = %account_id, amount = %amount, balance = %new_balance, "Withdraw");
        self.notify(&account, NotificationKind::Withdraw, &amount);

        Ok(new_balance)
    }

    /// Committed balance, reservations included
    pub async fn check_balance(&self, account_id: Uuid) -> Result<Balance, LedgerError> {
        Ok(self.load_account(account_id).await?.balance)
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    pub async fn pending_transaction(
        &self,
        tx_id: Uuid,
    ) -> Result<Option<PendingTransaction>, LedgerError> {
        Ok(self.store.get_pending(tx_id).await?)
    }

    /// PENDING branches older than `grace`
    pub async fn stale_pending(
        &self,
        grace: Duration,
    ) -> Result<Vec<PendingTransaction>, LedgerError> {
        let grace = chrono::Duration::from_std(grace).unwrap_or_else(|_| chrono::Duration::zero());
        Ok(self.store.find_stale_pending(Utc::now() - grace).await?)
    }

    async fn load_account(&self, account_id: Uuid) -> Result<Account, LedgerError> {
        self.store
            .get_account(account_id)
            .await?
            .ok_or_else(|| DomainError::AccountNotFound(account_id).into())
    }

    fn notify(&self, account: &Account, kind: NotificationKind, amount: &Amount) {
        self.notifier
            .notify(Notification::new(&account.email, kind, amount.to_string()));
    }
}

/// Outcome of a prepare whose tx id is already recorded
fn replay_vote(
    existing: &PendingTransaction,
    account_id: Uuid,
    amount: &Amount,
    kind: BranchKind,
) -> Vote {
    if !existing.matches(account_id, amount, kind) {
        tracing::warn!(
            tx_id = %existing.tx_id,
            recorded_account_id = %existing.account_id,
            account_id = %account_id,
            "Prepare replay with different parameters"
        );
        return Vote::Aborted(AbortReason::Conflict);
    }

    match existing.status {
        crate::domain::PendingStatus::Aborted => Vote::Aborted(AbortReason::Aborted),
        _ => Vote::Prepared,
    }
}
