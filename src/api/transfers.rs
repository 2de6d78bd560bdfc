//! Transfer endpoints

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

use crate::coordinator::TransferCoordinator;
use crate::domain::{OperationContext, SagaState, TransferRecord};
use crate::error::AppResult;

#[derive(Debug, Deserialize)]
pub struct TransferRequest {
    pub source_account_id: Uuid,
    pub target_account_id: Uuid,
    pub amount: Decimal,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub account_id: Uuid,
    pub transfers: Vec<TransferRecord>,
}

/// Saga progress without the branch identifiers
#[derive(Debug, Serialize)]
pub struct TransferStatusResponse {
    pub transfer_id: Uuid,
    pub source_account_id: Uuid,
    pub target_account_id: Uuid,
    pub amount: Decimal,
    pub state: SagaState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub fn router() -> Router<Arc<TransferCoordinator>> {
    Router::new()
        .route("/transfers", post(transfer))
        .route("/transfers/history/:account_id", get(history))
        .route("/transfers/:transfer_id", get(get_transfer))
}

async fn transfer(
    State(coordinator): State<Arc<TransferCoordinator>>,
    Extension(context): Extension<OperationContext>,
    Json(request): Json<TransferRequest>,
) -> AppResult<(StatusCode, Json<TransferRecord>)> {
    let record = coordinator
        .transfer(
            request.source_account_id,
            request.target_account_id,
            request.amount,
            &context,
        )
        .await?;

    Ok((StatusCode::CREATED, Json(record)))
}

async fn history(
    State(coordinator): State<Arc<TransferCoordinator>>,
    Path(account_id): Path<Uuid>,
) -> AppResult<Json<HistoryResponse>> {
    let transfers = coordinator.history(account_id).await?;

    Ok(Json(HistoryResponse {
        account_id,
        transfers,
    }))
}

async fn get_transfer(
    State(coordinator): State<Arc<TransferCoordinator>>,
    Path(transfer_id): Path<Uuid>,
) -> AppResult<Json<TransferStatusResponse>> {
    let saga = coordinator.transfer_status(transfer_id).await?;

    Ok(Json(TransferStatusResponse {
        transfer_id: saga.transfer_id,
        source_account_id: saga.source_account_id,
        target_account_id: saga.target_account_id,
        amount: saga.amount.value(),
        state: saga.state,
        created_at: saga.created_at,
        updated_at: saga.updated_at,
    }))
}
