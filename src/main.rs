//! ledger_2pc - ledger and transfer services
//!
//! Runs the ledger, the transfer coordinator, or both (APP_ROLE), backed by
//! Postgres when DATABASE_URL is set and by in-memory stores otherwise.

use std::net::SocketAddr;
use std::sync::Arc;

use sqlx::PgPool;

use ledger_2pc::api::{self, Services};
use ledger_2pc::auth::{Authorizer, RemoteAuthorizer, TokenAuthorizer};
use ledger_2pc::coordinator::{
    CoordinatorConfig, HttpLedgerClient, LedgerClient, LocalLedgerClient, MemoryTransferStore,
    PgTransferStore, RecoveryWorker, TransferCoordinator, TransferStore, WorkerConfig,
};
use ledger_2pc::db;
use ledger_2pc::jobs::{JobScheduler, JobSchedulerConfig};
use ledger_2pc::ledger::{LedgerService, LedgerStore, MemoryLedgerStore, PgLedgerStore};
use ledger_2pc::notify::{HttpNotifier, LogNotifier, Notifier};
use ledger_2pc::{init_tracing, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    init_tracing(config.log_json);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    tracing::info!(role = ?config.role, environment = %config.environment, "Starting ledger_2pc");

    let pool = match &config.database_url {
        Some(url) => Some(open_pool(&config, url).await?),
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory stores");
            None
        }
    };

    let ledger = if config.role.runs_ledger() {
        Some(Arc::new(build_ledger(&config, pool.as_ref())?))
    } else {
        None
    };

    let coordinator = if config.role.runs_transfer() {
        Some(Arc::new(build_coordinator(&config, pool.as_ref(), ledger.clone())?))
    } else {
        None
    };

    // Background maintenance
    let mut scheduler = JobScheduler::new(JobSchedulerConfig {
        scan_interval: config.recovery_scan_interval,
        pending_grace_period: config.pending_grace_period,
    });
    if let Some(ledger) = &ledger {
        scheduler = scheduler.with_ledger(ledger.clone());
    }
    if let Some(coordinator) = &coordinator {
        scheduler = scheduler.with_recovery(RecoveryWorker::new(
            coordinator.clone(),
            WorkerConfig {
                stale_threshold: config.pending_grace_period,
                ..WorkerConfig::default()
            },
        ));
    }
    let jobs = scheduler.start();

    let authorizer = build_authorizer(&config)?;
    let app = api::build_router(
        Services {
            ledger,
            coordinator,
        },
        authorizer,
    );

    tracing::info!("Listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    // Cleanup
    tracing::info!("Server shutting down...");
    jobs.abort();
    if let Some(pool) = pool {
        pool.close().await;
        tracing::info!("Database connections closed");
    }
    tracing::info!("Goodbye!");

    Ok(())
}

async fn open_pool(config: &Config, url: &str) -> anyhow::Result<PgPool> {
    tracing::info!("Connecting to database...");
    let pool = db::connect(config, url).await?;
    db::verify_connection(&pool).await?;

    let mut required = Vec::new();
    if config.role.runs_ledger() {
        required.extend_from_slice(db::LEDGER_TABLES);
    }
    if config.role.runs_transfer() {
        required.extend_from_slice(db::TRANSFER_TABLES);
    }

    // Verify database schema
    if !db::check_schema(&pool, &required).await? {
        tracing::error!("Database schema is not complete. Please run migrations.");
        return Err(anyhow::anyhow!("Database schema incomplete"));
    }

    tracing::info!("Database connected successfully");
    Ok(pool)
}

fn build_ledger(config: &Config, pool: Option<&PgPool>) -> anyhow::Result<LedgerService> {
    let store: Arc<dyn LedgerStore> = match pool {
        Some(pool) => Arc::new(PgLedgerStore::new(pool.clone())),
        None => Arc::new(MemoryLedgerStore::new()),
    };

    let notifier: Arc<dyn Notifier> = match &config.notification_url {
        Some(url) => Arc::new(HttpNotifier::new(url)?),
        None => Arc::new(LogNotifier),
    };

    Ok(LedgerService::new(store, notifier))
}

fn build_coordinator(
    config: &Config,
    pool: Option<&PgPool>,
    ledger: Option<Arc<LedgerService>>,
) -> anyhow::Result<TransferCoordinator> {
    let client: Arc<dyn LedgerClient> = match ledger {
        Some(ledger) => Arc::new(LocalLedgerClient::new(ledger)),
        None => {
            tracing::info!(ledger_url = %config.ledger_url, "Using remote ledger");
            Arc::new(HttpLedgerClient::new(
                &config.ledger_url,
                config.service_token.clone(),
                config.call_timeout,
            )?)
        }
    };

    let store: Arc<dyn TransferStore> = match pool {
        Some(pool) => Arc::new(PgTransferStore::new(pool.clone())),
        None => Arc::new(MemoryTransferStore::new()),
    };

    Ok(TransferCoordinator::new(
        client,
        store,
        CoordinatorConfig {
            call_timeout: config.call_timeout,
            commit_max_attempts: config.commit_max_attempts,
            commit_backoff: config.commit_retry_backoff,
        },
    ))
}

fn build_authorizer(config: &Config) -> anyhow::Result<Arc<dyn Authorizer>> {
    if let Some(url) = &config.auth_url {
        tracing::info!(auth_url = %url, "Using remote token validation");
        return Ok(Arc::new(RemoteAuthorizer::new(url.as_str(), config.call_timeout)?));
    }

    let authorizer = TokenAuthorizer::new(&config.auth_tokens);
    if authorizer.is_empty() {
        tracing::warn!("No AUTH_TOKENS configured, every API request will be rejected");
    }
    Ok(Arc::new(authorizer))
}

/// Shutdown signal handler for graceful shutdown
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}
