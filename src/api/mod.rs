//! API module
//!
//! HTTP API endpoints and middleware.

pub mod ledger;
pub mod middleware;
pub mod transfers;

use axum::{middleware as axum_middleware, routing::get, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::auth::Authorizer;
use crate::coordinator::TransferCoordinator;
use crate::ledger::LedgerService;

/// Services hosted by this process
#[derive(Clone, Default)]
pub struct Services {
    pub ledger: Option<Arc<LedgerService>>,
    pub coordinator: Option<Arc<TransferCoordinator>>,
}

/// Build the application router
pub fn build_router(services: Services, authorizer: Arc<dyn Authorizer>) -> Router {
    let mut api_router = Router::new();
    if let Some(ledger) = services.ledger {
        api_router = api_router.merge(ledger::router().with_state(ledger));
    }
    if let Some(coordinator) = services.coordinator {
        api_router = api_router.merge(transfers::router().with_state(coordinator));
    }

    // Layers run outermost-last: logging -> auth -> handler
    let protected_routes = api_router
        .layer(axum_middleware::from_fn_with_state(
            authorizer,
            middleware::auth_middleware,
        ))
        .layer(axum_middleware::from_fn(middleware::logging_middleware));

    Router::new()
        // Health check (no auth)
        .route("/health", get(health_check))
        .nest("/api/v1", protected_routes)
        .layer(TraceLayer::new_for_http())
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}
