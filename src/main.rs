use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use chat_relay_service::config::Settings;
use chat_relay_service::history::{create_message_store, PostgresMessageStore};
use chat_relay_service::postgres::PostgresPool;
use chat_relay_service::queue::create_queue_backend;
use chat_relay_service::redis::RedisPool;
use chat_relay_service::server::{create_app, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let settings = Settings::new()?;
    tracing::info!("Configuration loaded");

    let postgres_pool = connect_postgres(&settings).await?;
    let redis_pool = connect_redis(&settings).await;

    let store = create_message_store(&settings.history, postgres_pool.as_ref())?;
    let queue = create_queue_backend(&settings.queue, redis_pool.clone());

    let mut state = AppState::new(settings.clone(), queue, store);
    if let Some(pool) = postgres_pool.clone() {
        state = state.with_postgres_pool(pool);
    }
    if let Some(pool) = redis_pool {
        state = state.with_redis_pool(pool);
    }
    tracing::info!("Application state initialized");

    let shutdown_tx = state.shutdown.clone();
    let app = create_app(state);

    let addr = settings.server_addr();
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_handler(shutdown_tx))
        .await?;

    if let Some(pool) = postgres_pool {
        pool.close().await;
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Connect to PostgreSQL and prepare the history schema.
///
/// Returns `None` only when history is not kept in PostgreSQL. A configured
/// but unreachable database is a startup error: sends are acknowledged only
/// once durable.
async fn connect_postgres(settings: &Settings) -> Result<Option<PostgresPool>> {
    if settings.history.backend != "postgres" {
        return Ok(None);
    }

    let pool = PostgresPool::new(&settings.database)
        .await
        .context("Failed to connect to PostgreSQL for message history")?;

    PostgresMessageStore::new(pool.pool().clone())
        .ensure_schema()
        .await
        .context("Failed to prepare message history schema")?;

    tracing::info!(url = %pool.database_url_masked(), "Connected to PostgreSQL");
    Ok(Some(pool))
}

/// Connect to Redis for the offline queue.
async fn connect_redis(settings: &Settings) -> Option<Arc<RedisPool>> {
    if settings.queue.backend != "redis" {
        return None;
    }

    let pool = match RedisPool::new(settings.redis.clone()) {
        Ok(pool) => Arc::new(pool),
        Err(e) => {
            tracing::warn!(error = %e, "Invalid Redis configuration, offline queue falls back to memory");
            return None;
        }
    };

    match pool.ping().await {
        Ok(()) => {
            tracing::info!(url = %pool.url(), "Connected to Redis");
            Some(pool)
        }
        Err(e) => {
            tracing::warn!(error = %e, "Redis unavailable, offline queue falls back to memory");
            None
        }
    }
}

async fn shutdown_signal_handler(shutdown_tx: tokio::sync::broadcast::Sender<()>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }

    // Close open delivery streams so graceful shutdown can complete
    let _ = shutdown_tx.send(());
}
