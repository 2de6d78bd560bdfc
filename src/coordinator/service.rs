//! Transfer Coordinator
//!
//! Drives a transfer as two ledger branches through two-phase commit:
//!
//! 1. Persist the saga (PREPARING) with fresh withdraw/deposit branch ids.
//! 2. Prepare both branches concurrently, each call bounded by a timeout.
//! 3. Both PREPARED: write COMMITTING, then commit withdraw and deposit,
//!    retrying transient failures with the same ids. Once COMMITTING is
//!    written the transfer only moves forward.
//! 4. Anything else: write ABORTING and roll back both branches.
//!
//! The conditional PREPARING → COMMITTING / ABORTING update is the single
//! decision point, shared with the recovery worker.

use chrono::Utc;
use rust_decimal::Decimal;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::db::StoreError;
use crate::domain::{
    Amount, AmountError, OperationContext, SagaState, TransferRecord, TransferSaga, Vote,
};

use super::client::{ClientError, LedgerClient};
use super::store::TransferStore;

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Bound on every ledger call
    pub call_timeout: Duration,
    /// Inline commit attempts per branch before leaving it to recovery
    pub commit_max_attempts: u32,
    /// Base delay between commit attempts, multiplied by the attempt number
    pub commit_backoff: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(5),
            commit_max_attempts: 5,
            commit_backoff: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(#[from] AmountError),

    /// Client-safe reason; branch ids stay in the logs
    #[error("Transaction failed: {reason}")]
    TransactionFailed { transfer_id: Uuid, reason: String },

    #[error("Transfer not found: {0}")]
    NotFound(Uuid),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl TransferError {
    fn failed(transfer_id: Uuid, reason: impl Into<String>) -> Self {
        TransferError::TransactionFailed {
            transfer_id,
            reason: reason.into(),
        }
    }
}

pub struct TransferCoordinator {
    ledger: Arc<dyn LedgerClient>,
    store: Arc<dyn TransferStore>,
    config: CoordinatorConfig,
}

impl TransferCoordinator {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        store: Arc<dyn TransferStore>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            ledger,
            store,
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn TransferStore> {
        &self.store
    }

    // =========================================================================
    // Transfer
    // =========================================================================

    /// Move `amount` from `source` to `target`, all or nothing
    pub async fn transfer(
        &self,
        source_account_id: Uuid,
        target_account_id: Uuid,
        amount: Decimal,
        context: &OperationContext,
    ) -> Result<TransferRecord, TransferError> {
        let amount = Amount::new(amount)?;
        let saga = TransferSaga::begin(source_account_id, target_account_id, amount);
        if let Err(e) = self.store.save_saga(&saga).await {
            error!(transfer_id = %saga.transfer_id, error = %e, "Could not persist saga");
            return Err(TransferError::failed(
                saga.transfer_id,
                "transfer could not be started",
            ));
        }

        info!(
            transfer_id = %saga.transfer_id,
            correlation_id = ?context.correlation_id,
            principal = ?context.principal,
            source_account_id = %source_account_id,
            target_account_id = %target_account_id,
            amount = %amount,
            "Transfer started"
        );

        if let Err(reason) = self.prepare_both(&saga).await {
            self.abort(&saga).await;
            return Err(TransferError::failed(saga.transfer_id, reason));
        }

        if let Err(e) = self
            .store
            .update_saga_state(saga.transfer_id, SagaState::Preparing, SagaState::Committing)
            .await
        {
            warn!(transfer_id = %saga.transfer_id, error = %e, "Could not record commit decision");

            // An error does not prove the write was lost; the stored state decides
            match self.store.get_saga(saga.transfer_id).await {
                Ok(Some(current))
                    if matches!(current.state, SagaState::Committing | SagaState::Committed) =>
                {
                    debug!(transfer_id = %saga.transfer_id, "Commit decision was recorded");
                }
                Ok(Some(_)) => {
                    self.abort(&saga).await;
                    return Err(TransferError::failed(
                        saga.transfer_id,
                        "transfer could not be committed",
                    ));
                }
                Ok(None) | Err(_) => {
                    error!(
                        transfer_id = %saga.transfer_id,
                        "Commit decision unknown, left for recovery"
                    );
                    return Err(TransferError::failed(
                        saga.transfer_id,
                        "transfer outcome pending, check transfer status",
                    ));
                }
            }
        }

        match self.complete(&saga).await {
            Ok(record) => {
                info!(
                    transfer_id = %saga.transfer_id,
                    correlation_id = ?context.correlation_id,
                    "Transfer committed"
                );
                Ok(record)
            }
            Err(reason) => {
                error!(
                    transfer_id = %saga.transfer_id,
                    reason = %reason,
                    "Commit incomplete, left for recovery"
                );
                Err(TransferError::failed(
                    saga.transfer_id,
                    "commit in progress, check transfer status",
                ))
            }
        }
    }

    /// Completed transfers involving the account, in the order recorded
    pub async fn history(&self, account_id: Uuid) -> Result<Vec<TransferRecord>, TransferError> {
        Ok(self.store.history(account_id).await?)
    }

    pub async fn transfer_status(&self, transfer_id: Uuid) -> Result<TransferSaga, TransferError> {
        self.store
            .get_saga(transfer_id)
            .await?
            .ok_or(TransferError::NotFound(transfer_id))
    }

    // =========================================================================
    // Recovery
    // =========================================================================

    /// Push an unfinished saga towards a terminal state. Returns the state
    /// it ended in.
    pub async fn recover(&self, saga: &TransferSaga) -> Result<SagaState, TransferError> {
        match saga.state {
            SagaState::Preparing => {
                // Presumed abort: no decision was recorded
                match self
                    .store
                    .update_saga_state(saga.transfer_id, SagaState::Preparing, SagaState::Aborting)
                    .await
                {
                    Ok(()) => Ok(self.roll_back_branches(saga).await),
                    Err(StoreError::Conflict(_)) => self.current_state(saga.transfer_id).await,
                    Err(e) => Err(e.into()),
                }
            }
            SagaState::Aborting => Ok(self.roll_back_branches(saga).await),
            SagaState::Committing => match self.complete(saga).await {
                Ok(_) => Ok(SagaState::Committed),
                Err(reason) => Err(TransferError::failed(saga.transfer_id, reason)),
            },
            SagaState::Committed | SagaState::Aborted => Ok(saga.state),
        }
    }

    async fn current_state(&self, transfer_id: Uuid) -> Result<SagaState, TransferError> {
        Ok(self.transfer_status(transfer_id).await?.state)
    }

    // =========================================================================
    // Phases
    // =========================================================================

    async fn call<T>(
        &self,
        fut: impl Future<Output = Result<T, ClientError>>,
    ) -> Result<T, ClientError> {
        match tokio::time::timeout(self.config.call_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Timeout),
        }
    }

    /// Ok only if both branches voted PREPARED; otherwise a client-safe reason
    async fn prepare_both(&self, saga: &TransferSaga) -> Result<(), String> {
        let (withdraw, deposit) = tokio::join!(
            self.call(self.ledger.prepare_withdraw(
                saga.withdraw_tx_id,
                saga.source_account_id,
                saga.amount,
            )),
            self.call(self.ledger.prepare_deposit(
                saga.deposit_tx_id,
                saga.target_account_id,
                saga.amount,
            )),
        );

        let withdraw = vote_outcome(saga, saga.withdraw_tx_id, "source", withdraw);
        let deposit = vote_outcome(saga, saga.deposit_tx_id, "target", deposit);
        withdraw.and(deposit)
    }

    /// Abort a saga that has not been decided to commit. Branches are only
    /// rolled back once the stored state allows it.
    async fn abort(&self, saga: &TransferSaga) {
        if let Err(e) = self
            .store
            .update_saga_state(saga.transfer_id, SagaState::Preparing, SagaState::Aborting)
            .await
        {
            warn!(transfer_id = %saga.transfer_id, error = %e, "Could not record abort decision");

            match self.store.get_saga(saga.transfer_id).await {
                Ok(Some(current))
                    if matches!(current.state, SagaState::Preparing | SagaState::Aborting) => {}
                Ok(Some(current)) if current.state == SagaState::Aborted => return,
                Ok(Some(current)) => {
                    // Commit decision recorded; branches must not be rolled back
                    error!(
                        transfer_id = %saga.transfer_id,
                        state = %current.state,
                        "Abort requested after commit decision, not rolling back"
                    );
                    return;
                }
                Ok(None) | Err(_) => {
                    warn!(
                        transfer_id = %saga.transfer_id,
                        "Saga state unknown, rollback left for recovery"
                    );
                    return;
                }
            }
        }
        self.roll_back_branches(saga).await;
    }

    /// Best effort: a failed rollback leaves the saga ABORTING for recovery
    async fn roll_back_branches(&self, saga: &TransferSaga) -> SagaState {
        let (withdraw, deposit) = tokio::join!(
            self.call(self.ledger.rollback(saga.withdraw_tx_id)),
            self.call(self.ledger.rollback(saga.deposit_tx_id)),
        );

        let mut clean = true;
        for (tx_id, result) in [(saga.withdraw_tx_id, withdraw), (saga.deposit_tx_id, deposit)] {
            if let Err(e) = result {
                warn!(transfer_id = %saga.transfer_id, tx_id = %tx_id, error = %e, "Rollback failed");
                clean = false;
            }
        }
        if !clean {
            return SagaState::Aborting;
        }

        match self
            .store
            .update_saga_state(saga.transfer_id, SagaState::Aborting, SagaState::Aborted)
            .await
        {
            Ok(()) => {
                info!(transfer_id = %saga.transfer_id, "Transfer aborted");
                SagaState::Aborted
            }
            Err(e) => {
                debug!(transfer_id = %saga.transfer_id, error = %e, "Abort already recorded");
                SagaState::Aborting
            }
        }
    }

    /// Commit both branches and append the record. Only valid once the saga
    /// is COMMITTING.
    async fn complete(&self, saga: &TransferSaga) -> Result<TransferRecord, String> {
        for tx_id in [saga.withdraw_tx_id, saga.deposit_tx_id] {
            self.commit_with_retry(saga.transfer_id, tx_id)
                .await
                .map_err(|e| format!("commit of branch {} failed: {}", tx_id, e))?;
        }

        let record = saga.to_record(Utc::now());
        match self.store.complete_transfer(&record).await {
            Ok(()) => Ok(record),
            Err(StoreError::Conflict(_)) => {
                // Someone else completed it first
                match self.store.get_saga(saga.transfer_id).await {
                    Ok(Some(current)) if current.state == SagaState::Committed => Ok(record),
                    _ => Err("transfer record could not be appended".to_string()),
                }
            }
            Err(e) => Err(format!("transfer record could not be appended: {}", e)),
        }
    }

    async fn commit_with_retry(&self, transfer_id: Uuid, tx_id: Uuid) -> Result<(), ClientError> {
        let max_attempts = self.config.commit_max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.call(self.ledger.commit(tx_id)).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    warn!(
                        transfer_id = %transfer_id,
                        tx_id = %tx_id,
                        attempt,
                        error = %e,
                        "Commit failed, retrying"
                    );
                    tokio::time::sleep(self.config.commit_backoff * attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn vote_outcome(
    saga: &TransferSaga,
    tx_id: Uuid,
    side: &str,
    result: Result<Vote, ClientError>,
) -> Result<(), String> {
    match result {
        Ok(Vote::Prepared) => Ok(()),
        Ok(Vote::Aborted(reason)) => {
            info!(transfer_id = %saga.transfer_id, tx_id = %tx_id, reason = %reason, "Branch voted abort");
            Err(format!("{} account: {}", side, reason))
        }
        Err(e) => {
            warn!(transfer_id = %saga.transfer_id, tx_id = %tx_id, error = %e, "Prepare failed");
            Err(format!("{} account: ledger unavailable", side))
        }
    }
}
