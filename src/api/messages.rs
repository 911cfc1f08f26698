//! Message submission and per-user delivery state endpoints.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::delivery::{SendOutcome, UserId};
use crate::error::{AppError, Result};
use crate::queue::QueuedMessage;
use crate::server::AppState;

const DEFAULT_PEEK_LIMIT: usize = 50;
const MAX_PEEK_LIMIT: usize = 1000;

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct SendMessageResponse {
    pub success: bool,
    /// `"live"` or `"queued"`
    pub delivery: &'static str,
}

/// POST /api/v1/messages
#[tracing::instrument(
    name = "api.send_message",
    skip(state, request),
    fields(sender_id = request.sender_id, receiver_id = request.receiver_id)
)]
pub async fn send_message(
    State(state): State<AppState>,
    Json(request): Json<SendMessageRequest>,
) -> Result<Json<SendMessageResponse>> {
    if request.message.trim().is_empty() {
        return Err(AppError::Validation("message must not be empty".to_string()));
    }

    let outcome = state
        .coordinator
        .send_message(request.sender_id, request.receiver_id, request.message)
        .await?;

    // The live push keeps running after the handle is dropped
    let delivery = match outcome {
        SendOutcome::Pushed(_) => "live",
        SendOutcome::Queued => "queued",
    };

    Ok(Json(SendMessageResponse {
        success: true,
        delivery,
    }))
}

#[derive(Debug, Serialize)]
pub struct OnlineResponse {
    pub user_id: UserId,
    pub is_online: bool,
}

/// GET /api/v1/users/{user_id}/online
pub async fn user_online(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> Json<OnlineResponse> {
    Json(OnlineResponse {
        user_id,
        is_online: state.coordinator.is_online(user_id),
    })
}

#[derive(Debug, Deserialize)]
pub struct PeekQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct QueueResponse {
    pub user_id: UserId,
    pub backend: &'static str,
    pub size: usize,
    pub messages: Vec<QueuedMessage>,
}

/// GET /api/v1/users/{user_id}/queue?limit=N
///
/// Reads the offline queue without consuming it.
pub async fn user_queue(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    Query(query): Query<PeekQuery>,
) -> Result<Json<QueueResponse>> {
    let limit = query.limit.unwrap_or(DEFAULT_PEEK_LIMIT).min(MAX_PEEK_LIMIT);
    let queue = state.coordinator.queue();

    let size = queue.queue_size(user_id).await?;
    let messages = queue.peek(user_id, limit).await?;

    Ok(Json(QueueResponse {
        user_id,
        backend: queue.backend_type(),
        size,
        messages,
    }))
}
