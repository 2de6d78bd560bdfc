//! Postgres transfer store
//!
//! Tables: `transfer_sagas`, `transfers`. History is ordered by the
//! `transfers.seq` identity column.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::{map_unique_violation, StoreError};
use crate::domain::{Amount, SagaState, TransferRecord, TransferSaga};

use super::store::{check_transition, TransferStore};

type SagaRow = (
    Uuid,
    Uuid,
    Uuid,
    Uuid,
    Uuid,
    Decimal,
    String,
    i32,
    DateTime<Utc>,
    DateTime<Utc>,
);
type RecordRow = (Uuid, Uuid, Uuid, Decimal, DateTime<Utc>);

const SAGA_COLUMNS: &str = "transfer_id, withdraw_tx_id, deposit_tx_id, source_account_id, \
     target_account_id, amount, state, attempts, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct PgTransferStore {
    pool: PgPool,
}

impl PgTransferStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn saga_from_row(row: SagaRow) -> Result<TransferSaga, StoreError> {
    let (
        transfer_id,
        withdraw_tx_id,
        deposit_tx_id,
        source_account_id,
        target_account_id,
        amount,
        state,
        attempts,
        created_at,
        updated_at,
    ) = row;

    Ok(TransferSaga {
        transfer_id,
        withdraw_tx_id,
        deposit_tx_id,
        source_account_id,
        target_account_id,
        amount: Amount::new(amount)
            .map_err(|e| StoreError::Corrupt(format!("saga {}: {}", transfer_id, e)))?,
        state: state
            .parse()
            .map_err(|e| StoreError::Corrupt(format!("saga {}: {}", transfer_id, e)))?,
        attempts,
        created_at,
        updated_at,
    })
}

fn record_from_row(row: RecordRow) -> Result<TransferRecord, StoreError> {
    let (transfer_id, source_account_id, target_account_id, amount, timestamp) = row;

    Ok(TransferRecord {
        transfer_id,
        source_account_id,
        target_account_id,
        amount: Amount::new(amount)
            .map_err(|e| StoreError::Corrupt(format!("transfer {}: {}", transfer_id, e)))?,
        timestamp,
    })
}

#[async_trait]
impl TransferStore for PgTransferStore {
    async fn save_saga(&self, saga: &TransferSaga) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO transfer_sagas (
                transfer_id, withdraw_tx_id, deposit_tx_id, source_account_id,
                target_account_id, amount, state, attempts, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(saga.transfer_id)
        .bind(saga.withdraw_tx_id)
        .bind(saga.deposit_tx_id)
        .bind(saga.source_account_id)
        .bind(saga.target_account_id)
        .bind(saga.amount.value())
        .bind(saga.state.as_str())
        .bind(saga.attempts)
        .bind(saga.created_at)
        .bind(saga.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, saga.transfer_id))?;

        Ok(())
    }

    async fn update_saga_state(
        &self,
        transfer_id: Uuid,
        from: SagaState,
        to: SagaState,
    ) -> Result<(), StoreError> {
        check_transition(transfer_id, from, to)?;
        let result = sqlx::query(
            r#"
            UPDATE transfer_sagas
            SET state = $3, updated_at = NOW()
            WHERE transfer_id = $1 AND state = $2
            "#,
        )
        .bind(transfer_id)
        .bind(from.as_str())
        .bind(to.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(transfer_id));
        }
        Ok(())
    }

    async fn complete_transfer(&self, record: &TransferRecord) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE transfer_sagas
            SET state = 'COMMITTED', updated_at = NOW()
            WHERE transfer_id = $1 AND state = 'COMMITTING'
            "#,
        )
        .bind(record.transfer_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(record.transfer_id));
        }

        sqlx::query(
            r#"
            INSERT INTO transfers (transfer_id, source_account_id, target_account_id, amount, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(record.transfer_id)
        .bind(record.source_account_id)
        .bind(record.target_account_id)
        .bind(record.amount.value())
        .bind(record.timestamp)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_unique_violation(e, record.transfer_id))?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_saga(&self, transfer_id: Uuid) -> Result<Option<TransferSaga>, StoreError> {
        let row: Option<SagaRow> = sqlx::query_as(&format!(
            "SELECT {} FROM transfer_sagas WHERE transfer_id = $1",
            SAGA_COLUMNS
        ))
        .bind(transfer_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(saga_from_row).transpose()
    }

    async fn find_unfinished(
        &self,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TransferSaga>, StoreError> {
        let rows: Vec<SagaRow> = sqlx::query_as(&format!(
            r#"
            SELECT {}
            FROM transfer_sagas
            WHERE state IN ('PREPARING', 'COMMITTING', 'ABORTING') AND updated_at <= $1
            ORDER BY updated_at
            LIMIT $2
            "#,
            SAGA_COLUMNS
        ))
        .bind(older_than)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(saga_from_row).collect()
    }

    async fn record_attempt(&self, transfer_id: Uuid) -> Result<i32, StoreError> {
        let attempts: Option<i32> = sqlx::query_scalar(
            r#"
            UPDATE transfer_sagas
            SET attempts = attempts + 1, updated_at = NOW()
            WHERE transfer_id = $1
            RETURNING attempts
            "#,
        )
        .bind(transfer_id)
        .fetch_optional(&self.pool)
        .await?;

        attempts.ok_or(StoreError::NotFound(transfer_id))
    }

    async fn history(&self, account_id: Uuid) -> Result<Vec<TransferRecord>, StoreError> {
        let rows: Vec<RecordRow> = sqlx::query_as(
            r#"
            SELECT transfer_id, source_account_id, target_account_id, amount, created_at
            FROM transfers
            WHERE source_account_id = $1 OR target_account_id = $1
            ORDER BY seq
            "#,
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(record_from_row).collect()
    }
}
