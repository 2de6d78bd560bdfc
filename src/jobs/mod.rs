//! Scheduled Jobs
//!
//! Background jobs for periodic maintenance tasks: reporting ledger branches
//! stuck in PENDING and re-driving unfinished transfer sagas.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

use crate::coordinator::{RecoveryWorker, TransferError};
use crate::ledger::{LedgerError, LedgerService};

// =========================================================================
// Stuck PENDING branches
// =========================================================================

/// Log PENDING branches older than the grace period. Nothing is changed:
/// only the coordinator that owns a branch may decide its outcome.
pub async fn report_stale_pending(
    ledger: &LedgerService,
    grace_period: Duration,
) -> Result<usize, JobError> {
    let stale = ledger.stale_pending(grace_period).await?;

    for pending in &stale {
        tracing::warn!(
            tx_id = %pending.tx_id,
            account_id = %pending.account_id,
            kind = %pending.kind,
            amount = %pending.amount,
            created_at = %pending.created_at,
            "Transaction stuck in PENDING past grace period"
        );
    }

    Ok(stale.len())
}

// =========================================================================
// Saga recovery
// =========================================================================

pub async fn recover_transfers(worker: &RecoveryWorker) -> Result<usize, JobError> {
    Ok(worker.scan_and_recover().await?)
}

// =========================================================================
// Job Scheduler
// =========================================================================

/// Configuration for job scheduler
#[derive(Debug, Clone)]
pub struct JobSchedulerConfig {
    /// Interval between both maintenance passes (default: 30 seconds)
    pub scan_interval: Duration,
    /// Age after which a PENDING branch is reported (default: 5 minutes)
    pub pending_grace_period: Duration,
}

impl Default for JobSchedulerConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(30),
            pending_grace_period: Duration::from_secs(300),
        }
    }
}

/// Job Scheduler - runs periodic maintenance tasks for whichever services
/// this process hosts
pub struct JobScheduler {
    ledger: Option<Arc<LedgerService>>,
    recovery: Option<RecoveryWorker>,
    config: JobSchedulerConfig,
}

impl JobScheduler {
    pub fn new(config: JobSchedulerConfig) -> Self {
        Self {
            ledger: None,
            recovery: None,
            config,
        }
    }

    pub fn with_ledger(mut self, ledger: Arc<LedgerService>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn with_recovery(mut self, worker: RecoveryWorker) -> Self {
        self.recovery = Some(worker);
        self
    }

    /// Start the job scheduler in the background
    /// Returns a handle that can be used to abort the scheduler
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    /// Run the scheduler loop
    async fn run(&self) {
        tracing::info!(
            scan_interval_secs = self.config.scan_interval.as_secs(),
            pending_grace_period_secs = self.config.pending_grace_period.as_secs(),
            "Job scheduler started"
        );

        let mut pending_interval = interval(self.config.scan_interval);
        let mut recovery_interval = interval(self.config.scan_interval);

        loop {
            tokio::select! {
                _ = pending_interval.tick(), if self.ledger.is_some() => {
                    if let Some(ledger) = &self.ledger {
                        if let Err(e) = report_stale_pending(ledger, self.config.pending_grace_period).await {
                            tracing::error!(error = %e, "Stale pending check failed");
                        }
                    }
                }
                _ = recovery_interval.tick(), if self.recovery.is_some() => {
                    if let Some(worker) = &self.recovery {
                        if let Err(e) = recover_transfers(worker).await {
                            tracing::error!(error = %e, "Transfer recovery failed");
                        }
                    }
                }
                else => {
                    tracing::info!("No maintenance jobs configured, scheduler exiting");
                    break;
                }
            }
        }
    }

    /// Run all maintenance jobs once (for manual trigger or testing)
    pub async fn run_all_once(&self) -> MaintenanceReport {
        let mut report = MaintenanceReport {
            stale_pending: 0,
            transfers_recovered: 0,
            errors: Vec::new(),
            completed_at: Utc::now(),
        };

        if let Some(ledger) = &self.ledger {
            match report_stale_pending(ledger, self.config.pending_grace_period).await {
                Ok(count) => report.stale_pending = count,
                Err(e) => report.errors.push(format!("Stale pending check: {}", e)),
            }
        }

        if let Some(worker) = &self.recovery {
            match recover_transfers(worker).await {
                Ok(count) => report.transfers_recovered = count,
                Err(e) => report.errors.push(format!("Transfer recovery: {}", e)),
            }
        }

        report.completed_at = Utc::now();
        report
    }
}

/// Report from running maintenance jobs
#[derive(Debug, Clone)]
pub struct MaintenanceReport {
    pub stale_pending: usize,
    pub transfers_recovered: usize,
    pub errors: Vec<String>,
    pub completed_at: DateTime<Utc>,
}

/// Job execution errors
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Transfer error: {0}")]
    Transfer(#[from] TransferError),
}

// =========================================================================
// Tests
// =========================================================================
