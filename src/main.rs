//! Payment event engine server.
//!
//! Serves provider webhooks over HTTP and runs the reconciliation worker
//! until ctrl-c or SIGTERM.

use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use payment_event_engine::adapters::http::{webhook_router, WebhookAppState};
use payment_event_engine::adapters::postgres::{
    PostgresActionOutbox, PostgresBillingStore, PostgresLedgerStore,
};
use payment_event_engine::application::{ReconciliationConfig, ReconciliationWorker};
use payment_event_engine::config::{AppConfig, ServerConfig};
use payment_event_engine::domain::webhooks::{SignatureVerifier, WebhookProcessor};
use payment_event_engine::ports::LedgerStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let config = AppConfig::load()?;
    config.validate()?;

    init_tracing(&config.server);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        provider = %config.webhook.provider,
        "starting payment event engine"
    );

    let pool = config
        .database
        .pool_options()
        .connect_with(config.database.connect_options()?)
        .await?;
    tracing::info!("database connection established");

    if config.database.run_migrations {
        sqlx::migrate!("./migrations").run(&pool).await?;
        tracing::info!("database migrations applied");
    }

    let ledger: Arc<dyn LedgerStore> = Arc::new(PostgresLedgerStore::new(pool.clone()));
    let processor = WebhookProcessor::new(
        SignatureVerifier::new(
            config.webhook.signing_secret.clone(),
            config.webhook.tolerance_secs,
        ),
        ledger.clone(),
        Arc::new(PostgresBillingStore::new(pool.clone())),
        Arc::new(PostgresActionOutbox::new(pool.clone())),
        config.webhook.processing_deadline(),
    )
    .with_max_attempts(config.webhook.max_attempts);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = ReconciliationWorker::new(
        ledger.clone(),
        processor.clone(),
        ReconciliationConfig::from(&config.webhook),
    );
    let worker_handle = tokio::spawn(async move { worker.run(shutdown_rx).await });

    let state = WebhookAppState::new(processor, ledger, &config.server, &config.webhook)?;
    if state.admin_token.is_none() {
        tracing::info!("admin token not configured; ledger admin routes disabled");
    }
    let app = webhook_router(state);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    // Stop the worker after in-flight requests drain.
    let _ = shutdown_tx.send(true);
    if let Err(e) = worker_handle.await {
        tracing::error!(error = %e, "reconciliation worker panicked");
    }

    pool.close().await;
    tracing::info!("shutdown complete");
    Ok(())
}

fn init_tracing(server: &ServerConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&server.log_level));

    let registry = tracing_subscriber::registry().with(filter);
    if server.json_logs() {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer().pretty()).init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C, starting graceful shutdown"),
        _ = terminate => tracing::info!("received SIGTERM, starting graceful shutdown"),
    }
}
