//! Transfer Store
//!
//! Saga log plus the append-only transfer history.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::db::StoreError;
use crate::domain::{SagaState, TransferRecord, TransferSaga};

#[async_trait]
pub trait TransferStore: Send + Sync {
    /// Persist a new saga. `StoreError::Duplicate` if the transfer id exists.
    async fn save_saga(&self, saga: &TransferSaga) -> Result<(), StoreError>;

    /// Move a saga from `from` to `to`. `StoreError::InvalidTransition` if
    /// the state machine has no such edge, `StoreError::Conflict` if the saga
    /// is no longer in `from`.
    async fn update_saga_state(
        &self,
        transfer_id: Uuid,
        from: SagaState,
        to: SagaState,
    ) -> Result<(), StoreError>;

    /// Mark a COMMITTING saga COMMITTED and append its record, atomically
    async fn complete_transfer(&self, record: &TransferRecord) -> Result<(), StoreError>;

    async fn get_saga(&self, transfer_id: Uuid) -> Result<Option<TransferSaga>, StoreError>;

    /// Non-terminal sagas last touched at or before `older_than`, oldest first
    async fn find_unfinished(
        &self,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TransferSaga>, StoreError>;

    /// Count a failed recovery pass. Returns the new attempt count.
    async fn record_attempt(&self, transfer_id: Uuid) -> Result<i32, StoreError>;

    /// Completed transfers involving the account, in the order recorded
    async fn history(&self, account_id: Uuid) -> Result<Vec<TransferRecord>, StoreError>;
}

/// Reject state changes outside the saga state machine
pub(crate) fn check_transition(
    transfer_id: Uuid,
    from: SagaState,
    to: SagaState,
) -> Result<(), StoreError> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(StoreError::InvalidTransition {
            id: transfer_id,
            from,
            to,
        })
    }
}

#[derive(Default)]
struct Inner {
    sagas: HashMap<Uuid, TransferSaga>,
    records: Vec<TransferRecord>,
}

/// In-memory transfer store
#[derive(Default)]
pub struct MemoryTransferStore {
    inner: Mutex<Inner>,
}

impl MemoryTransferStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl TransferStore for MemoryTransferStore {
    async fn save_saga(&self, saga: &TransferSaga) -> Result<(), StoreError> {
        let mut inner = self.inner();
        if inner.sagas.contains_key(&saga.transfer_id) {
            return Err(StoreError::Duplicate(saga.transfer_id));
        }
        inner.sagas.insert(saga.transfer_id, saga.clone());
        Ok(())
    }

    async fn update_saga_state(
        &self,
        transfer_id: Uuid,
        from: SagaState,
        to: SagaState,
    ) -> Result<(), StoreError> {
        check_transition(transfer_id, from, to)?;
        let mut inner = self.inner();
        let saga = inner
            .sagas
            .get_mut(&transfer_id)
            .ok_or(StoreError::NotFound(transfer_id))?;
        if saga.state != from {
            return Err(StoreError::Conflict(transfer_id));
        }
        saga.state = to;
        saga.updated_at = Utc::now();
        Ok(())
    }

    async fn complete_transfer(&self, record: &TransferRecord) -> Result<(), StoreError> {
        let mut inner = self.inner();
        let saga = inner
            .sagas
            .get_mut(&record.transfer_id)
            .ok_or(StoreError::NotFound(record.transfer_id))?;
        if saga.state != SagaState::Committing {
            return Err(StoreError::Conflict(record.transfer_id));
        }
        saga.state = SagaState::Committed;
        saga.updated_at = Utc::now();
        inner.records.push(record.clone());
        Ok(())
    }

    async fn get_saga(&self, transfer_id: Uuid) -> Result<Option<TransferSaga>, StoreError> {
        Ok(self.inner().sagas.get(&transfer_id).cloned())
    }

    async fn find_unfinished(
        &self,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TransferSaga>, StoreError> {
        let mut sagas: Vec<_> = self
            .inner()
            .sagas
            .values()
            .filter(|s| !s.state.is_terminal() && s.updated_at <= older_than)
            .cloned()
            .collect();
        sagas.sort_by_key(|s| s.updated_at);
        sagas.truncate(limit);
        Ok(sagas)
    }

    async fn record_attempt(&self, transfer_id: Uuid) -> Result<i32, StoreError> {
        let mut inner = self.inner();
        let saga = inner
            .sagas
            .get_mut(&transfer_id)
            .ok_or(StoreError::NotFound(transfer_id))?;
        saga.attempts += 1;
        saga.updated_at = Utc::now();
        Ok(saga.attempts)
    }

    async fn history(&self, account_id: Uuid) -> Result<Vec<TransferRecord>, StoreError> {
        Ok(self
            .inner()
            .records
            .iter()
            .filter(|r| r.involves(account_id))
            .cloned()
            .collect())
    }
}
