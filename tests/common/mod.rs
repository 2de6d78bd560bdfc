//! Common test utilities

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use ledger_2pc::coordinator::{
    ClientError, CoordinatorConfig, LedgerClient, LocalLedgerClient, MemoryTransferStore,
    TransferCoordinator, TransferStore,
};
use ledger_2pc::db::StoreError;
use ledger_2pc::domain::{SagaState, TransferRecord, TransferSaga, Vote};
use ledger_2pc::ledger::{LedgerService, MemoryLedgerStore};
use ledger_2pc::notify::LogNotifier;
use ledger_2pc::Amount;

/// In-memory ledger and coordinator wired through injectable client and store
pub struct TestStack {
    pub ledger: Arc<LedgerService>,
    pub client: Arc<FlakyLedgerClient>,
    pub store: Arc<ScriptedTransferStore>,
    pub coordinator: Arc<TransferCoordinator>,
}

pub fn fast_config() -> CoordinatorConfig {
    CoordinatorConfig {
        call_timeout: Duration::from_millis(500),
        commit_max_attempts: 3,
        commit_backoff: Duration::from_millis(1),
    }
}

pub fn setup_stack() -> TestStack {
    setup_stack_with(fast_config())
}

pub fn setup_stack_with(config: CoordinatorConfig) -> TestStack {
    let ledger = Arc::new(LedgerService::new(
        Arc::new(MemoryLedgerStore::new()),
        Arc::new(LogNotifier),
    ));
    let client = Arc::new(FlakyLedgerClient::new(Arc::new(LocalLedgerClient::new(
        ledger.clone(),
    ))));
    let store = Arc::new(ScriptedTransferStore::new());
    let coordinator = Arc::new(TransferCoordinator::new(client.clone(), store.clone(), config));

    TestStack {
        ledger,
        client,
        store,
        coordinator,
    }
}

impl TestStack {
    /// Open an account and fund it
    pub async fn account(&self, balance: Decimal) -> Uuid {
        let id = Uuid::new_v4();
        self.ledger
            .open_account(id, "Test Owner", "owner@example.com")
            .await
            .expect("Failed to open account");
        if balance > Decimal::ZERO {
            self.ledger
                .deposit(id, balance)
                .await
                .expect("Failed to fund account");
        }
        id
    }

    pub async fn balance(&self, id: Uuid) -> Decimal {
        self.ledger
            .check_balance(id)
            .await
            .expect("Failed to read balance")
            .value()
    }
}

/// Passes calls through to a real client unless a failure is queued
pub struct FlakyLedgerClient {
    inner: Arc<dyn LedgerClient>,
    deposit_faults: Mutex<VecDeque<ClientError>>,
    commit_faults: Mutex<VecDeque<ClientError>>,
    prepare_delay: Mutex<Option<Duration>>,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
}

impl FlakyLedgerClient {
    pub fn new(inner: Arc<dyn LedgerClient>) -> Self {
        Self {
            inner,
            deposit_faults: Mutex::new(VecDeque::new()),
            commit_faults: Mutex::new(VecDeque::new()),
            prepare_delay: Mutex::new(None),
            commits: AtomicUsize::new(0),
            rollbacks: AtomicUsize::new(0),
        }
    }

    pub fn fail_next_prepare_deposit(&self, err: ClientError) {
        self.deposit_faults.lock().unwrap().push_back(err);
    }

    pub fn fail_commits(&self, err: ClientError, times: usize) {
        let mut faults = self.commit_faults.lock().unwrap();
        for _ in 0..times {
            faults.push_back(err.clone());
        }
    }

    /// Hold every prepare call for `delay` before it reaches the ledger
    pub fn delay_prepares(&self, delay: Duration) {
        *self.prepare_delay.lock().unwrap() = Some(delay);
    }

    pub fn clear_faults(&self) {
        self.deposit_faults.lock().unwrap().clear();
        self.commit_faults.lock().unwrap().clear();
        *self.prepare_delay.lock().unwrap() = None;
    }

    /// Commit calls that reached the ledger
    pub fn commits_delivered(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    /// Rollback calls that reached the ledger
    pub fn rollbacks_delivered(&self) -> usize {
        self.rollbacks.load(Ordering::SeqCst)
    }

    async fn pause(&self) {
        let delay = *self.prepare_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl LedgerClient for FlakyLedgerClient {
    async fn prepare_withdraw(
        &self,
        tx_id: Uuid,
        account_id: Uuid,
        amount: Amount,
    ) -> Result<Vote, ClientError> {
        self.pause().await;
        self.inner.prepare_withdraw(tx_id, account_id, amount).await
    }

    async fn prepare_deposit(
        &self,
        tx_id: Uuid,
        account_id: Uuid,
        amount: Amount,
    ) -> Result<Vote, ClientError> {
        let fault = self.deposit_faults.lock().unwrap().pop_front();
        if let Some(err) = fault {
            return Err(err);
        }
        self.pause().await;
        self.inner.prepare_deposit(tx_id, account_id, amount).await
    }

    async fn commit(&self, tx_id: Uuid) -> Result<(), ClientError> {
        let fault = self.commit_faults.lock().unwrap().pop_front();
        if let Some(err) = fault {
            return Err(err);
        }
        self.commits.fetch_add(1, Ordering::SeqCst);
        self.inner.commit(tx_id).await
    }

    async fn rollback(&self, tx_id: Uuid) -> Result<(), ClientError> {
        self.rollbacks.fetch_add(1, Ordering::SeqCst);
        self.inner.rollback(tx_id).await
    }
}

/// How a scripted state write fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteFault {
    /// The write never reaches the store
    Dropped,
    /// The write is applied but the caller sees an error
    AckLost,
}

/// In-memory transfer store with scripted failures
pub struct ScriptedTransferStore {
    inner: MemoryTransferStore,
    save_faults: AtomicUsize,
    transition_faults: Mutex<Vec<(SagaState, WriteFault)>>,
    read_faults: AtomicUsize,
    complete_faults: AtomicUsize,
    attempt_faults: AtomicBool,
}

fn unavailable() -> StoreError {
    StoreError::Database(sqlx::Error::PoolTimedOut)
}

/// Consume one queued failure, if any
fn take(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl ScriptedTransferStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryTransferStore::new(),
            save_faults: AtomicUsize::new(0),
            transition_faults: Mutex::new(Vec::new()),
            read_faults: AtomicUsize::new(0),
            complete_faults: AtomicUsize::new(0),
            attempt_faults: AtomicBool::new(false),
        }
    }

    pub fn fail_next_save(&self) {
        self.save_faults.fetch_add(1, Ordering::SeqCst);
    }

    /// Fail the next state write that moves a saga into `to`
    pub fn fail_transition_to(&self, to: SagaState, fault: WriteFault) {
        self.transition_faults.lock().unwrap().push((to, fault));
    }

    pub fn fail_reads(&self, times: usize) {
        self.read_faults.fetch_add(times, Ordering::SeqCst);
    }

    pub fn fail_next_complete(&self) {
        self.complete_faults.fetch_add(1, Ordering::SeqCst);
    }

    pub fn fail_record_attempts(&self, fail: bool) {
        self.attempt_faults.store(fail, Ordering::SeqCst);
    }

    /// Saga state as stored, bypassing scripted failures
    pub async fn state_of(&self, transfer_id: Uuid) -> SagaState {
        self.inner
            .get_saga(transfer_id)
            .await
            .expect("Failed to read saga")
            .expect("Saga missing")
            .state
    }

    fn transition_fault(&self, to: SagaState) -> Option<WriteFault> {
        let mut faults = self.transition_faults.lock().unwrap();
        let index = faults.iter().position(|(state, _)| *state == to)?;
        Some(faults.remove(index).1)
    }
}

#[async_trait]
impl TransferStore for ScriptedTransferStore {
    async fn save_saga(&self, saga: &TransferSaga) -> Result<(), StoreError> {
        if take(&self.save_faults) {
            return Err(unavailable());
        }
        self.inner.save_saga(saga).await
    }

    async fn update_saga_state(
        &self,
        transfer_id: Uuid,
        from: SagaState,
        to: SagaState,
    ) -> Result<(), StoreError> {
        match self.transition_fault(to) {
            Some(WriteFault::Dropped) => Err(unavailable()),
            Some(WriteFault::AckLost) => {
                self.inner.update_saga_state(transfer_id, from, to).await?;
                Err(unavailable())
            }
            None => self.inner.update_saga_state(transfer_id, from, to).await,
        }
    }

    async fn complete_transfer(&self, record: &TransferRecord) -> Result<(), StoreError> {
        if take(&self.complete_faults) {
            return Err(unavailable());
        }
        self.inner.complete_transfer(record).await
    }

    async fn get_saga(&self, transfer_id: Uuid) -> Result<Option<TransferSaga>, StoreError> {
        if take(&self.read_faults) {
            return Err(unavailable());
        }
        self.inner.get_saga(transfer_id).await
    }

    async fn find_unfinished(
        &self,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TransferSaga>, StoreError> {
        self.inner.find_unfinished(older_than, limit).await
    }

    async fn record_attempt(&self, transfer_id: Uuid) -> Result<i32, StoreError> {
        if self.attempt_faults.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        self.inner.record_attempt(transfer_id).await
    }

    async fn history(&self, account_id: Uuid) -> Result<Vec<TransferRecord>, StoreError> {
        self.inner.history(account_id).await
    }
}
