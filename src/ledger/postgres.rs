//! Postgres ledger store
//!
//! Tables: `accounts`, `pending_transactions` (see migrations/001_init.sql).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::{map_unique_violation, StoreError};
use crate::domain::{Account, Amount, Balance, PendingTransaction};

use super::store::LedgerStore;

type AccountRow = (Uuid, String, String, Decimal, DateTime<Utc>);
type PendingRow = (
    Uuid,
    Uuid,
    Decimal,
    String,
    String,
    DateTime<Utc>,
    Option<DateTime<Utc>>,
);

#[derive(Debug, Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn account_from_row(row: AccountRow) -> Result<Account, StoreError> {
    let (id, owner_name, email, balance, created_at) = row;
    let balance = Balance::new(balance)
        .map_err(|e| StoreError::Corrupt(format!("account {}: {}", id, e)))?;

    Ok(Account {
        id,
        owner_name,
        email,
        balance,
        created_at,
    })
}

fn pending_from_row(row: PendingRow) -> Result<PendingTransaction, StoreError> {
    let (tx_id, account_id, amount, kind, status, created_at, completed_at) = row;
    let corrupt = |e: String| StoreError::Corrupt(format!("pending transaction {}: {}", tx_id, e));

    Ok(PendingTransaction {
        tx_id,
        account_id,
        amount: Amount::new(amount).map_err(|e| corrupt(e.to_string()))?,
        kind: kind.parse().map_err(corrupt)?,
        status: status.parse().map_err(corrupt)?,
        created_at,
        completed_at,
    })
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn insert_account(&self, account: &Account) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO accounts (id, owner_name, email, balance, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $5)
            "#,
        )
        .bind(account.id)
        .bind(&account.owner_name)
        .bind(&account.email)
        .bind(account.balance.value())
        .bind(account.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, account.id))?;

        Ok(())
    }

    async fn get_account(&self, account_id: Uuid) -> Result<Option<Account>, StoreError> {
        let row: Option<AccountRow> = sqlx::query_as(
            "SELECT id, owner_name, email, balance, created_at FROM accounts WHERE id = $1",
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(account_from_row).transpose()
    }

    async fn update_balance(&self, account_id: Uuid, balance: Balance) -> Result<(), StoreError> {
        let result =
            sqlx::query("UPDATE accounts SET balance = $2, updated_at = NOW() WHERE id = $1")
                .bind(account_id)
                .bind(balance.value())
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(account_id));
        }
        Ok(())
    }

    async fn get_pending(&self, tx_id: Uuid) -> Result<Option<PendingTransaction>, StoreError> {
        let row: Option<PendingRow> = sqlx::query_as(
            r#"
            SELECT tx_id, account_id, amount, kind, status, created_at, completed_at
            FROM pending_transactions
            WHERE tx_id = $1
            "#,
        )
        .bind(tx_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(pending_from_row).transpose()
    }

    async fn insert_pending(&self, pending: &PendingTransaction) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO pending_transactions (tx_id, account_id, amount, kind, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(pending.tx_id)
        .bind(pending.account_id)
        .bind(pending.amount.value())
        .bind(pending.kind.as_str())
        .bind(pending.status.as_str())
        .bind(pending.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, pending.tx_id))?;

        Ok(())
    }

    async fn reserved_amount(&self, account_id: Uuid) -> Result<Decimal, StoreError> {
        let reserved: Decimal = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(amount), 0)
            FROM pending_transactions
            WHERE account_id = $1 AND kind = 'WITHDRAW' AND status = 'PENDING'
            "#,
        )
        .bind(account_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(reserved)
    }

    async fn commit_pending(&self, tx_id: Uuid, balance: Balance) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        let account_id: Option<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE pending_transactions
            SET status = 'COMMITTED', completed_at = NOW()
            WHERE tx_id = $1 AND status = 'PENDING'
            RETURNING account_id
            "#,
        )
        .bind(tx_id)
        .fetch_optional(&mut *tx)
        .await?;

        // Dropping `tx` without commit rolls the transaction back
        let account_id = account_id.ok_or(StoreError::Conflict(tx_id))?;

        let result =
            sqlx::query("UPDATE accounts SET balance = $2, updated_at = NOW() WHERE id = $1")
                .bind(account_id)
                .bind(balance.value())
                .execute(&mut *tx)
                .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(account_id));
        }

        tx.commit().await?;
        Ok(())
    }

    async fn abort_pending(&self, tx_id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE pending_transactions
            SET status = 'ABORTED', completed_at = NOW()
            WHERE tx_id = $1 AND status = 'PENDING'
            "#,
        )
        .bind(tx_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(tx_id));
        }
        Ok(())
    }

    async fn find_stale_pending(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<PendingTransaction>, StoreError> {
        let rows: Vec<PendingRow> = sqlx::query_as(
            r#"
            SELECT tx_id, account_id, amount, kind, status, created_at, completed_at
            FROM pending_transactions
            WHERE status = 'PENDING' AND created_at < $1
            ORDER BY created_at
            LIMIT 1000
            "#,
        )
        .bind(older_than)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(pending_from_row).collect()
    }
}
