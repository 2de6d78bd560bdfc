//! Notifications
//!
//! Fire-and-forget messages to account owners after balance changes.
//! Delivery failures are logged and never reach the caller.

use serde::Serialize;
use std::fmt;
use std::time::Duration;

use crate::domain::BranchKind;

/// What happened to the account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    Deposit,
    Withdraw,
}

impl From<BranchKind> for NotificationKind {
    fn from(kind: BranchKind) -> Self {
        match kind {
            BranchKind::Withdraw => NotificationKind::Withdraw,
            BranchKind::Deposit => NotificationKind::Deposit,
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotificationKind::Deposit => f.write_str("DEPOSIT"),
            NotificationKind::Withdraw => f.write_str("WITHDRAW"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub recipient: String,
    pub kind: NotificationKind,
    pub detail: String,
}

impl Notification {
    pub fn new(recipient: impl Into<String>, kind: NotificationKind, detail: impl Into<String>) -> Self {
        Self {
            recipient: recipient.into(),
            kind,
            detail: detail.into(),
        }
    }
}

pub trait Notifier: Send + Sync {
    /// Must return immediately; delivery happens in the background.
    fn notify(&self, notification: Notification);
}

/// Writes notifications to the log only
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: Notification) {
        tracing::info!(
            recipient = %notification.recipient,
            kind = %notification.kind,
            detail = %notification.detail,
            "Notification"
        );
    }
}

/// Body accepted by the notification service
#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    to: &'a str,
    subject: String,
    text: &'a str,
}

/// Posts notifications to `{base_url}/api/v1/notifications/send`
#[derive(Debug, Clone)]
pub struct HttpNotifier {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpNotifier {
    pub fn new(base_url: &str) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/api/v1/notifications/send", base_url.trim_end_matches('/')),
        })
    }
}

impl Notifier for HttpNotifier {
    fn notify(&self, notification: Notification) {
        let client = self.client.clone();
        let endpoint = self.endpoint.clone();

        tokio::spawn(async move {
            let body = SendRequest {
                to: &notification.recipient,
                subject: notification.kind.to_string(),
                text: &notification.detail,
            };
            let result = client
                .post(&endpoint)
                .json(&body)
                .send()
                .await
                .and_then(|response| response.error_for_status());

            if let Err(e) = result {
                tracing::warn!(
                    recipient = %notification.recipient,
                    kind = %notification.kind,
                    error = %e,
                    "Notification delivery failed"
                );
            }
        });
    }
}
