//! Ledger endpoints
//!
//! Participant RPCs called by the transfer coordinator, plus the direct
//! single-phase account operations.

use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::coordinator::PrepareRequest;
use crate::domain::{BranchKind, OperationContext, PendingStatus, PendingTransaction, Vote};
use crate::error::AppError;
use crate::ledger::LedgerService;

// =========================================================================
// Request/Response types
// =========================================================================

#[derive(Debug, Deserialize)]
pub struct OpenAccountRequest {
    /// Generated when omitted
    #[serde(default)]
    pub account_id: Option<Uuid>,
    pub owner_name: String,
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct AccountResponse {
    pub account_id: Uuid,
    pub owner_name: String,
    pub email: String,
    pub balance: Decimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct AmountRequest {
    pub amount: Decimal,
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub account_id: Uuid,
    pub balance: Decimal,
}

#[derive(Debug, Serialize)]
pub struct PendingTransactionResponse {
    pub tx_id: Uuid,
    pub account_id: Uuid,
    pub amount: Decimal,
    pub kind: BranchKind,
    pub status: PendingStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<PendingTransaction> for PendingTransactionResponse {
    fn from(p: PendingTransaction) -> Self {
        Self {
            tx_id: p.tx_id,
            account_id: p.account_id,
            amount: p.amount.value(),
            kind: p.kind,
            status: p.status,
            created_at: p.created_at,
            completed_at: p.completed_at,
        }
    }
}

// =========================================================================
// Router
// =========================================================================

pub fn router() -> Router<Arc<LedgerService>> {
    Router::new()
        // Two-phase commit participant
        .route(
            "/ledger/transactions/:tx_id/prepare-withdraw",
            post(prepare_withdraw),
        )
        .route(
            "/ledger/transactions/:tx_id/prepare-deposit",
            post(prepare_deposit),
        )
        .route("/ledger/transactions/:tx_id/commit", post(commit))
        .route("/ledger/transactions/:tx_id/rollback", post(rollback))
        .route("/ledger/transactions/:tx_id", get(get_transaction))
        // Accounts
        .route("/accounts", post(open_account))
        .route("/accounts/:account_id/deposit", post(deposit))
        .route("/accounts/:account_id/withdraw", post(withdraw))
        .route("/accounts/:account_id/balance", get(get_balance))
}

// =========================================================================
// Two-phase commit
// =========================================================================

/// Reserve funds for a transfer branch. Always 200: a refusal is a vote.
async fn prepare_withdraw(
    State(ledger): State<Arc<LedgerService>>,
    Path(tx_id): Path<Uuid>,
    Json(request): Json<PrepareRequest>,
) -> Result<Json<Vote>, AppError> {
    let vote = ledger
        .prepare_withdraw(tx_id, request.account_id, request.amount)
        .await?;
    Ok(Json(vote))
}

async fn prepare_deposit(
    State(ledger): State<Arc<LedgerService>>,
    Path(tx_id): Path<Uuid>,
    Json(request): Json<PrepareRequest>,
) -> Result<Json<Vote>, AppError> {
    let vote = ledger
        .prepare_deposit(tx_id, request.account_id, request.amount)
        .await?;
    Ok(Json(vote))
}

async fn commit(
    State(ledger): State<Arc<LedgerService>>,
    Path(tx_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    ledger.commit(tx_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn rollback(
    State(ledger): State<Arc<LedgerService>>,
    Path(tx_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    ledger.rollback(tx_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_transaction(
    State(ledger): State<Arc<LedgerService>>,
    Path(tx_id): Path<Uuid>,
) -> Result<Json<PendingTransactionResponse>, AppError> {
    let pending = ledger
        .pending_transaction(tx_id)
        .await?
        .ok_or(AppError::TransactionNotFound(tx_id))?;

    Ok(Json(pending.into()))
}

// =========================================================================
// Accounts
// =========================================================================

async fn open_account(
    State(ledger): State<Arc<LedgerService>>,
    Extension(context): Extension<OperationContext>,
    Json(request): Json<OpenAccountRequest>,
) -> Result<(StatusCode, Json<AccountResponse>), AppError> {
    if request.owner_name.trim().is_empty() || request.email.trim().is_empty() {
        return Err(AppError::InvalidRequest(
            "owner_name and email are required".to_string(),
        ));
    }

    let account_id = request.account_id.unwrap_or_else(Uuid::new_v4);
    let account = ledger
        .open_account(account_id, request.owner_name.trim(), request.email.trim())
        .await?;

    tracing::debug!(
        account_id = %account.id,
        correlation_id = ?context.correlation_id,
        "Account registered"
    );

    Ok((
        StatusCode::CREATED,
        Json(AccountResponse {
            account_id: account.id,
            owner_name: account.owner_name,
            email: account.email,
            balance: account.balance.value(),
            created_at: account.created_at,
        }),
    ))
}

async fn deposit(
    State(ledger): State<Arc<LedgerService>>,
    Path(account_id): Path<Uuid>,
    Json(request): Json<AmountRequest>,
) -> Result<Json<BalanceResponse>, AppError> {
    let balance = ledger.deposit(account_id, request.amount).await?;

    Ok(Json(BalanceResponse {
        account_id,
        balance: balance.value(),
    }))
}

async fn withdraw(
    State(ledger): State<Arc<LedgerService>>,
    Path(account_id): Path<Uuid>,
    Json(request): Json<AmountRequest>,
) -> Result<Json<BalanceResponse>, AppError> {
    let balance = ledger.withdraw(account_id, request.amount).await?;

    Ok(Json(BalanceResponse {
        account_id,
        balance: balance.value(),
    }))
}

async fn get_balance(
    State(ledger): State<Arc<LedgerService>>,
    Path(account_id): Path<Uuid>,
) -> Result<Json<BalanceResponse>, AppError> {
    let balance = ledger.check_balance(account_id).await?;

    Ok(Json(BalanceResponse {
        account_id,
        balance: balance.value(),
    }))
}
