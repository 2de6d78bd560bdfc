//! Recovery Worker
//!
//! Re-drives sagas left unfinished by a crashed or interrupted coordinator.
//! PREPARING and ABORTING sagas are rolled back; COMMITTING sagas have their
//! commits retried with the original branch ids.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::domain::SagaState;

use super::service::{TransferCoordinator, TransferError};

/// Recovery passes after which a saga is reported for operator attention
const ALERT_AFTER_ATTEMPTS: i32 = 10;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How long a saga must sit untouched before recovery picks it up
    pub stale_threshold: Duration,
    /// Maximum sagas handled per scan
    pub batch_size: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            stale_threshold: Duration::from_secs(300),
            batch_size: 100,
        }
    }
}

pub struct RecoveryWorker {
    coordinator: Arc<TransferCoordinator>,
    config: WorkerConfig,
}

impl RecoveryWorker {
    pub fn new(coordinator: Arc<TransferCoordinator>, config: WorkerConfig) -> Self {
        Self {
            coordinator,
            config,
        }
    }

    /// Run a single scan. Returns how many sagas reached a terminal state.
    pub async fn scan_and_recover(&self) -> Result<usize, TransferError> {
        let threshold = chrono::Duration::from_std(self.config.stale_threshold)
            .unwrap_or_else(|_| chrono::Duration::zero());
        let stale = self
            .coordinator
            .store()
            .find_unfinished(Utc::now() - threshold, self.config.batch_size)
            .await?;

        if stale.is_empty() {
            debug!("No unfinished transfers");
            return Ok(0);
        }
        info!(count = stale.len(), "Found unfinished transfers to recover");

        let mut recovered = 0;
        for saga in &stale {
            let outcome = self.coordinator.recover(saga).await;

            match outcome {
                Ok(state) if state.is_terminal() => {
                    info!(
                        transfer_id = %saga.transfer_id,
                        old_state = %saga.state,
                        new_state = %state,
                        "Transfer recovered"
                    );
                    recovered += 1;
                    continue;
                }
                Ok(state) => {
                    warn!(transfer_id = %saga.transfer_id, state = %state, "Transfer still unfinished");
                }
                Err(e) => {
                    warn!(transfer_id = %saga.transfer_id, error = %e, "Recovery attempt failed");
                }
            }

            // Bookkeeping failure only skips this saga
            let attempts = match self.coordinator.store().record_attempt(saga.transfer_id).await {
                Ok(attempts) => attempts,
                Err(e) => {
                    warn!(transfer_id = %saga.transfer_id, error = %e, "Could not record recovery attempt");
                    continue;
                }
            };
            if attempts >= ALERT_AFTER_ATTEMPTS {
                error!(
                    transfer_id = %saga.transfer_id,
                    state = %saga.state,
                    attempts,
                    committing = saga.state == SagaState::Committing,
                    "Transfer stuck, needs operator attention"
                );
            }
        }

        if recovered > 0 {
            info!(count = recovered, "Recovered transfers this scan");
        }
        Ok(recovered)
    }
}
