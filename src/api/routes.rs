use axum::{
    routing::{get, post},
    Router,
};

use crate::server::AppState;

use super::health::{health, stats};
use super::messages::{send_message, user_online, user_queue};
use super::metrics::prometheus_metrics;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        // Health & Stats
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/metrics", get(prometheus_metrics))
        .nest(
            "/api/v1",
            Router::new()
                .route("/messages", post(send_message))
                .route("/users/{user_id}/online", get(user_online))
                .route("/users/{user_id}/queue", get(user_queue)),
        )
}
