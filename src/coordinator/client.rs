//! Ledger clients
//!
//! The coordinator's view of the ledger: four idempotent calls keyed by
//! branch id. A business refusal comes back as `Vote::Aborted`; anything
//! that prevented an answer is a `ClientError`.

use async_trait::async_trait;
use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{Amount, Vote};
use crate::error::ErrorResponse;
use crate::ledger::{LedgerError, LedgerService};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    /// Ledger unreachable or failed without answering
    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Ledger call timed out")]
    Timeout,

    /// Ledger answered and refused the call. Retrying will not help.
    #[error("Ledger rejected the call: {0}")]
    Rejected(String),
}

impl ClientError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::Transport(_) | ClientError::Timeout)
    }
}

/// Body of the prepare RPCs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrepareRequest {
    pub account_id: Uuid,
    pub amount: Decimal,
}

#[async_trait]
pub trait LedgerClient: Send + Sync {
    async fn prepare_withdraw(
        &self,
        tx_id: Uuid,
        account_id: Uuid,
        amount: Amount,
    ) -> Result<Vote, ClientError>;

    async fn prepare_deposit(
        &self,
        tx_id: Uuid,
        account_id: Uuid,
        amount: Amount,
    ) -> Result<Vote, ClientError>;

    async fn commit(&self, tx_id: Uuid) -> Result<(), ClientError>;

    async fn rollback(&self, tx_id: Uuid) -> Result<(), ClientError>;
}

// =========================================================================
// In-process
// =========================================================================

/// Calls a ledger living in the same process
#[derive(Clone)]
pub struct LocalLedgerClient {
    ledger: Arc<LedgerService>,
}

impl LocalLedgerClient {
    pub fn new(ledger: Arc<LedgerService>) -> Self {
        Self { ledger }
    }
}

impl From<LedgerError> for ClientError {
    fn from(err: LedgerError) -> Self {
        if err.is_retryable() {
            ClientError::Transport(err.to_string())
        } else {
            ClientError::Rejected(err.to_string())
        }
    }
}

#[async_trait]
impl LedgerClient for LocalLedgerClient {
    async fn prepare_withdraw(
        &self,
        tx_id: Uuid,
        account_id: Uuid,
        amount: Amount,
    ) -> Result<Vote, ClientError> {
        Ok(self
            .ledger
            .prepare_withdraw(tx_id, account_id, amount.value())
            .await?)
    }

    async fn prepare_deposit(
        &self,
        tx_id: Uuid,
        account_id: Uuid,
        amount: Amount,
    ) -> Result<Vote, ClientError> {
        Ok(self
            .ledger
            .prepare_deposit(tx_id, account_id, amount.value())
            .await?)
    }

    async fn commit(&self, tx_id: Uuid) -> Result<(), ClientError> {
        Ok(self.ledger.commit(tx_id).await?)
    }

    async fn rollback(&self, tx_id: Uuid) -> Result<(), ClientError> {
        Ok(self.ledger.rollback(tx_id).await?)
    }
}

// =========================================================================
// Over HTTP
// =========================================================================

/// Calls a remote ledger's `/api/v1/ledger/transactions` RPCs
#[derive(Debug, Clone)]
pub struct HttpLedgerClient {
    client: reqwest::Client,
    base_url: String,
    service_token: Option<String>,
}

impl HttpLedgerClient {
    pub fn new(
        base_url: &str,
        service_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            service_token,
        })
    }

    fn url(&self, tx_id: Uuid, action: &str) -> String {
        format!(
            "{}/api/v1/ledger/transactions/{}/{}",
            self.base_url, tx_id, action
        )
    }

    async fn post(
        &self,
        url: String,
        body: Option<&PrepareRequest>,
    ) -> Result<reqwest::Response, ClientError> {
        let mut request = self.client.post(url);
        if let Some(token) = &self.service_token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let detail = match response.json::<ErrorResponse>().await {
            Ok(body) => body.error_code,
            Err(_) => status.to_string(),
        };
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            Err(ClientError::Transport(detail))
        } else {
            Err(ClientError::Rejected(detail))
        }
    }

    async fn prepare(
        &self,
        tx_id: Uuid,
        action: &str,
        account_id: Uuid,
        amount: Amount,
    ) -> Result<Vote, ClientError> {
        let body = PrepareRequest {
            account_id,
            amount: amount.value(),
        };
        let response = self.post(self.url(tx_id, action), Some(&body)).await?;

        response.json::<Vote>().await.map_err(transport_error)
    }
}

fn transport_error(err: reqwest::Error) -> ClientError {
    if err.is_timeout() {
        ClientError::Timeout
    } else {
        ClientError::Transport(err.to_string())
    }
}

#[async_trait]
impl LedgerClient for HttpLedgerClient {
    async fn prepare_withdraw(
        &self,
        tx_id: Uuid,
        account_id: Uuid,
        amount: Amount,
    ) -> Result<Vote, ClientError> {
        self.prepare(tx_id, "prepare-withdraw", account_id, amount)
            .await
    }

    async fn prepare_deposit(
        &self,
        tx_id: Uuid,
        account_id: Uuid,
        amount: Amount,
    ) -> Result<Vote, ClientError> {
        self.prepare(tx_id, "prepare-deposit", account_id, amount)
            .await
    }

    async fn commit(&self, tx_id: Uuid) -> Result<(), ClientError> {
        self.post(self.url(tx_id, "commit"), None).await?;
        Ok(())
    }

    async fn rollback(&self, tx_id: Uuid) -> Result<(), ClientError> {
        self.post(self.url(tx_id, "rollback"), None).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DomainError;

    #[test]
    fn test_client_error_retryable() {
        assert!(ClientError::Timeout.is_retryable());
        assert!(ClientError::Transport("connection refused".into()).is_retryable());
        assert!(!ClientError::Rejected("COMMIT_AFTER_ABORT".into()).is_retryable());
    }

    #[test]
    fn test_ledger_error_mapping() {
        let err: ClientError = LedgerError::Domain(DomainError::CommitAfterAbort(Uuid::new_v4())).into();
        assert!(matches!(err, ClientError::Rejected(_)));

        let err: ClientError =
            LedgerError::Store(crate::db::StoreError::Conflict(Uuid::new_v4())).into();
        assert!(matches!(err, ClientError::Transport(_)));
    }

    #[test]
    fn test_http_urls() {
        let client =
            HttpLedgerClient::new("http://ledger:3001/", None, Duration::from_secs(1)).unwrap();
        let tx_id = Uuid::nil();

        assert_eq!(
            client.url(tx_id, "commit"),
            "http://ledger:3001/api/v1/ledger/transactions/00000000-0000-0000-0000-000000000000/commit"
        );
    }

    #[tokio::test]
    async fn test_http_unreachable_is_transport_failure() {
        let client =
            HttpLedgerClient::new("http://127.0.0.1:9", None, Duration::from_millis(200)).unwrap();

        let err = client.commit(Uuid::new_v4()).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
