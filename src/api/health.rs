//! Health check and statistics endpoints.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::delivery::DeliveryStatsSnapshot;
use crate::presence::PresenceStats;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redis: Option<RedisHealthResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub postgres: Option<PostgresHealthResponse>,
    pub presence: PresenceStats,
    pub queue_backend: String,
}

#[derive(Debug, Serialize)]
pub struct RedisHealthResponse {
    pub status: String,
    pub connected: bool,
}

#[derive(Debug, Serialize)]
pub struct PostgresHealthResponse {
    pub status: String,
    pub connected: bool,
    pub pool_size: u32,
    pub idle_connections: u32,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub presence: PresenceStats,
    pub delivery: DeliveryStatsSnapshot,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let redis = match state.redis_pool {
        Some(ref pool) => {
            let connected = match pool.ping().await {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(error = %e, "Redis health check failed");
                    false
                }
            };
            Some(RedisHealthResponse {
                status: if connected { "connected" } else { "disconnected" }.to_string(),
                connected,
            })
        }
        None => None,
    };

    let postgres = state.postgres_pool.as_ref().map(|pool| {
        let inner_pool = pool.pool();
        let connected = !inner_pool.is_closed();
        PostgresHealthResponse {
            status: if connected { "connected" } else { "closed" }.to_string(),
            connected,
            pool_size: inner_pool.size(),
            idle_connections: inner_pool.num_idle() as u32,
        }
    });

    let degraded = redis.as_ref().is_some_and(|r| !r.connected)
        || postgres.as_ref().is_some_and(|p| !p.connected);
    let status = if degraded { "degraded" } else { "healthy" };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        redis,
        postgres,
        presence: state.coordinator.presence().stats(),
        queue_backend: state.coordinator.queue().backend_type().to_string(),
    })
}

pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        presence: state.coordinator.presence().stats(),
        delivery: state.coordinator.stats(),
    })
}
