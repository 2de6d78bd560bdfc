//! Database module
//!
//! Database connection, schema verification and the storage error shared by
//! every store implementation (Postgres and in-memory).

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use crate::config::Config;
use crate::domain::SagaState;

/// Errors raised by ledger and transfer stores
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Primary key already present
    #[error("Duplicate key: {0}")]
    Duplicate(Uuid),

    /// Row expected to exist is missing
    #[error("Record not found: {0}")]
    NotFound(Uuid),

    /// Conditional update lost against a concurrent writer
    #[error("Record {0} changed concurrently")]
    Conflict(Uuid),

    /// Requested state change is not an edge of the saga state machine
    #[error("Invalid transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: Uuid,
        from: SagaState,
        to: SagaState,
    },

    /// Row could not be mapped back into a domain value
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Database(_) | StoreError::Conflict(_))
    }
}

/// Open a connection pool from configuration
pub async fn connect(config: &Config, database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(database_url)
        .await
}

/// Verify database connectivity
pub async fn verify_connection(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;

    Ok(())
}

/// Tables each service needs (see migrations/001_init.sql)
pub const LEDGER_TABLES: &[&str] = &["accounts", "pending_transactions"];
pub const TRANSFER_TABLES: &[&str] = &["transfer_sagas", "transfers"];

/// Check if required tables exist
pub async fn check_schema(pool: &PgPool, required_tables: &[&str]) -> Result<bool, sqlx::Error> {
    for table in required_tables {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = 'public' AND table_name = $1
            )
            "#,
        )
        .bind(table)
        .fetch_one(pool)
        .await?;

        if !exists {
            tracing::error!("Required table '{}' does not exist", table);
            return Ok(false);
        }
    }

    Ok(true)
}

/// Map a unique-violation into `StoreError::Duplicate`
pub(crate) fn map_unique_violation(err: sqlx::Error, key: Uuid) -> StoreError {
    match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => StoreError::Duplicate(key),
        _ => StoreError::Database(err),
    }
}
