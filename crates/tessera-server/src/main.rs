//! `tessera` server entry point.
//!
//! Loads configuration, selects the storage backend, builds the shared
//! state, then serves the Axum router until SIGINT or SIGTERM.

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::info;

use tessera_core::billing::BillingProvider;
use tessera_server::billing::HttpBillingProvider;
use tessera_server::config::{ServerConfig, StorageBackendType};
use tessera_server::routes::build_router;
use tessera_server::state::AppState;
use tessera_storage::MemoryStore;

/// Connection pool size for the `PostgreSQL` backend.
#[cfg(feature = "postgres-backend")]
const PG_MAX_CONNECTIONS: u32 = 16;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env().context("invalid configuration")?;

    // Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .json()
        .init();

    info!(storage = ?config.storage_backend, unmatched_routes = ?config.unmatched_routes, "tessera starting");

    let state = build_app_state(&config).await?;
    let app = build_router(state);

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.bind_addr))?;

    info!(addr = %config.bind_addr, "tessera server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("tessera server stopped");
    Ok(())
}

/// Build the shared application state for the configured backend.
async fn build_app_state(config: &ServerConfig) -> anyhow::Result<Arc<AppState>> {
    if config.billing.api_key.is_empty() {
        tracing::warn!("TESSERA_BILLING_API_KEY is not set; billing provider calls will be rejected");
    }
    let provider: Arc<dyn BillingProvider> = Arc::new(
        HttpBillingProvider::new(&config.billing).context("failed to build billing client")?,
    );

    let state = match &config.storage_backend {
        StorageBackendType::Memory => {
            info!("using in-memory storage (data will not persist)");
            AppState::build(Arc::new(MemoryStore::new()), provider, config)
        }
        #[cfg(feature = "postgres-backend")]
        StorageBackendType::Postgres { url } => {
            info!(url = %"[redacted]", "using PostgreSQL storage");
            let store = tessera_storage::PostgresStore::connect(url, PG_MAX_CONNECTIONS)
                .await
                .context("failed to connect to PostgreSQL storage")?;
            AppState::build(Arc::new(store), provider, config)
        }
        #[cfg(not(feature = "postgres-backend"))]
        StorageBackendType::Postgres { .. } => {
            anyhow::bail!("PostgreSQL backend requested but feature 'postgres-backend' is not enabled");
        }
    }
    .context("failed to build application state")?;

    Ok(Arc::new(state))
}

/// Resolve on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        if let Ok(mut sig) =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            sig.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("shutdown signal received, stopping server");
}
