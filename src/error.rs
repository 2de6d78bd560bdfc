//! Error handling module
//!
//! Centralized error types and HTTP response conversion.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::coordinator::TransferError;
use crate::db::StoreError;
use crate::domain::DomainError;
use crate::ledger::LedgerError;

/// Application-wide Result type
pub type AppResult<T> = Result<T, AppError>;

/// Application error types
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // Client errors (4xx)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Transfer not found: {0}")]
    TransferNotFound(uuid::Uuid),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(uuid::Uuid),

    // Domain errors
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// A transfer did not complete; the message is safe to show
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    // Server errors (5xx)
    #[error("Database error: {0}")]
    Store(#[from] StoreError),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Domain(e) => AppError::Domain(e),
            LedgerError::Store(e) => AppError::Store(e),
            LedgerError::Invariant(msg) => AppError::Internal(msg),
        }
    }
}

impl From<TransferError> for AppError {
    fn from(err: TransferError) -> Self {
        match err {
            TransferError::InvalidAmount(e) => AppError::Domain(DomainError::InvalidAmount(e)),
            TransferError::TransactionFailed { reason, .. } => AppError::TransactionFailed(reason),
            TransferError::NotFound(id) => AppError::TransferNotFound(id),
            TransferError::Store(e) => AppError::Store(e),
        }
    }
}

/// Error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, details) = match &self {
            // 400 Bad Request
            AppError::InvalidRequest(msg) => {
                (StatusCode::BAD_REQUEST, "INVALID_REQUEST", Some(msg.clone()))
            }

            // 401 Unauthorized
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", None),

            // 404 Not Found
            AppError::TransferNotFound(id) => {
                (StatusCode::NOT_FOUND, "TRANSFER_NOT_FOUND", Some(id.to_string()))
            }
            AppError::TransactionNotFound(id) => {
                (StatusCode::NOT_FOUND, "TRANSACTION_NOT_FOUND", Some(id.to_string()))
            }

            // Domain errors - map to appropriate HTTP status
            AppError::Domain(domain_err) => match domain_err {
                DomainError::InvalidAmount(e) => {
                    (StatusCode::BAD_REQUEST, "INVALID_AMOUNT", Some(e.to_string()))
                }
                DomainError::AccountNotFound(id) => {
                    (StatusCode::NOT_FOUND, "ACCOUNT_NOT_FOUND", Some(id.to_string()))
                }
                DomainError::InsufficientBalance { .. } => (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    "INSUFFICIENT_BALANCE",
                    Some(domain_err.to_string()),
                ),
                DomainError::DuplicateAccount(id) => {
                    (StatusCode::CONFLICT, "DUPLICATE_ACCOUNT", Some(id.to_string()))
                }
                DomainError::CommitAfterAbort(_) => {
                    (StatusCode::CONFLICT, "COMMIT_AFTER_ABORT", None)
                }
            },

            // 502 Bad Gateway
            AppError::TransactionFailed(reason) => {
                (StatusCode::BAD_GATEWAY, "TRANSACTION_FAILED", Some(reason.clone()))
            }

            // 500 Internal Server Error
            AppError::Store(e) => {
                tracing::error!("Database error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "DATABASE_ERROR", None)
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", None)
            }
            AppError::Config(e) => {
                tracing::error!("Config error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "CONFIG_ERROR", None)
            }
        };

        // Server-side messages may carry internal identifiers
        let error = match &self {
            AppError::TransactionFailed(_) => "Transaction failed".to_string(),
            _ if status.is_server_error() => "Internal server error".to_string(),
            _ => self.to_string(),
        };

        let body = ErrorResponse {
            error,
            error_code: error_code.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}
