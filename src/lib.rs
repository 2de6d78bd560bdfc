//! ledger_2pc Library
//!
//! Ledger and transfer services coordinated by two-phase commit.
//! Re-exports modules for the binaries and integration tests.

pub mod api;
pub mod auth;
pub mod config;
pub mod coordinator;
pub mod db;
pub mod domain;
mod error;
pub mod jobs;
pub mod ledger;
pub mod notify;

pub use config::{AppRole, Config};
pub use error::{AppError, AppResult, ErrorResponse};
pub use domain::{Amount, AmountError, Balance, DomainError, OperationContext};

/// Initialize tracing/logging
pub fn init_tracing(json: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "ledger_2pc=debug,tower_http=debug".into());
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
