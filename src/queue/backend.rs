//! Backend trait for offline queue storage.
//!
//! This module defines the abstraction layer for offline queue backends,
//! allowing different storage implementations (memory, Redis) to be
//! used interchangeably.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::delivery::{ChatMessage, UserId};
use crate::redis::PoolError;

/// Errors that can occur during queue backend operations.
#[derive(Debug, Error)]
pub enum QueueBackendError {
    /// Redis operation failed
    #[error("Redis error: {0}")]
    Redis(#[from] PoolError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A message waiting in a receiver's offline queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedMessage {
    pub sender_id: UserId,
    pub body: String,
    /// Original send time, replayed unchanged on delivery
    pub sent_at: DateTime<Utc>,
}

impl QueuedMessage {
    /// Rebuild the chat message for delivery to `receiver_id`.
    pub fn into_chat_message(self, receiver_id: UserId) -> ChatMessage {
        ChatMessage {
            sender_id: self.sender_id,
            receiver_id,
            body: self.body,
            timestamp: self.sent_at,
        }
    }
}

impl From<&ChatMessage> for QueuedMessage {
    fn from(message: &ChatMessage) -> Self {
        Self {
            sender_id: message.sender_id,
            body: message.body.clone(),
            sent_at: message.timestamp,
        }
    }
}

/// Backend trait for per-receiver offline queues.
///
/// Every receiver has one FIFO sequence. Implementations must be
/// thread-safe (`Send + Sync`) as they are shared across tasks.
///
/// `enqueue`, `drain_all` and `restore` must be mutually exclusive for the
/// same receiver: an entry appended concurrently with a drain is either part
/// of the drained batch or still queued afterwards, never lost.
#[async_trait]
pub trait MessageQueueBackend: Send + Sync {
    /// Backend type identifier (for logs and stats).
    fn backend_type(&self) -> &'static str;

    /// Append a message to the tail of the receiver's queue.
    async fn enqueue(&self, receiver_id: UserId, message: QueuedMessage) -> Result<(), QueueBackendError>;

    /// Atomically take every queued message for the receiver, oldest first.
    ///
    /// The queue is empty afterwards.
    async fn drain_all(&self, receiver_id: UserId) -> Result<Vec<QueuedMessage>, QueueBackendError>;

    /// Put undelivered messages back at the head of the queue, keeping their
    /// order ahead of anything appended since they were drained.
    async fn restore(&self, receiver_id: UserId, messages: Vec<QueuedMessage>) -> Result<(), QueueBackendError>;

    /// Look at up to `limit` queued messages without removing them.
    async fn peek(&self, receiver_id: UserId, limit: usize) -> Result<Vec<QueuedMessage>, QueueBackendError>;

    /// Number of queued messages for the receiver.
    async fn queue_size(&self, receiver_id: UserId) -> Result<usize, QueueBackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queued_message_keeps_send_time() {
        let original = ChatMessage::new(1, 2, "hi");
        let queued = QueuedMessage::from(&original);

        assert_eq!(queued.sender_id, 1);
        assert_eq!(queued.body, "hi");
        assert_eq!(queued.into_chat_message(2), original);
    }

    #[test]
    fn test_queued_message_json_shape() {
        let queued = QueuedMessage::from(&ChatMessage::new(5, 9, "hello"));
        let value = serde_json::to_value(&queued).unwrap();

        assert_eq!(value["sender_id"], 5);
        assert_eq!(value["body"], "hello");
        assert!(value.get("sent_at").is_some());
        assert!(value.get("receiver_id").is_none());
    }
}
