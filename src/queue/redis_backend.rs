//! Redis-based offline queue backend using Redis lists.
//!
//! Messages are persisted and survive service restarts. Each receiver has a
//! dedicated list `{prefix}:{receiver_id}` holding JSON-encoded entries,
//! oldest at the head.

use std::sync::Arc;

use async_trait::async_trait;

use crate::delivery::UserId;
use crate::redis::{RedisListExt, RedisPool};

use super::backend::{MessageQueueBackend, QueueBackendError, QueuedMessage};

/// Redis-based offline queue backend.
pub struct RedisQueueBackend {
    pool: Arc<RedisPool>,

    /// Key prefix for Redis keys
    prefix: String,
}

impl RedisQueueBackend {
    pub fn new(pool: Arc<RedisPool>, prefix: String) -> Self {
        Self { pool, prefix }
    }

    /// Generate the Redis key for a receiver's queue.
    fn queue_key(&self, receiver_id: UserId) -> String {
        format!("{}:{}", self.prefix, receiver_id)
    }

    /// Decode raw list entries, skipping anything that is not a queued message.
    fn decode_entries(key: &str, raw: Vec<String>) -> Vec<QueuedMessage> {
        raw.into_iter()
            .filter_map(|json| match serde_json::from_str::<QueuedMessage>(&json) {
                Ok(message) => Some(message),
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        key = %key,
                        "Failed to deserialize queued message, skipping"
                    );
                    None
                }
            })
            .collect()
    }
}

#[async_trait]
impl MessageQueueBackend for RedisQueueBackend {
    fn backend_type(&self) -> &'static str {
        "redis"
    }

    async fn enqueue(&self, receiver_id: UserId, message: QueuedMessage) -> Result<(), QueueBackendError> {
        let key = self.queue_key(receiver_id);
        let json = serde_json::to_string(&message)?;

        self.pool.rpush(&key, &json).await?;

        tracing::debug!(receiver_id = receiver_id, key = %key, "Message enqueued to Redis list");

        Ok(())
    }

    async fn drain_all(&self, receiver_id: UserId) -> Result<Vec<QueuedMessage>, QueueBackendError> {
        let key = self.queue_key(receiver_id);

        // LRANGE + DEL inside MULTI/EXEC, so no RPUSH can land in between
        let raw = self.pool.take_all(&key).await?;
        let messages = Self::decode_entries(&key, raw);

        if !messages.is_empty() {
            tracing::debug!(
                receiver_id = receiver_id,
                message_count = messages.len(),
                "Drained offline queue from Redis"
            );
        }

        Ok(messages)
    }

    async fn restore(&self, receiver_id: UserId, messages: Vec<QueuedMessage>) -> Result<(), QueueBackendError> {
        let key = self.queue_key(receiver_id);
        let encoded = messages
            .iter()
            .map(serde_json::to_string)
            .collect::<Result<Vec<_>, _>>()?;

        self.pool.push_front_ordered(&key, encoded).await?;
        Ok(())
    }

    async fn peek(&self, receiver_id: UserId, limit: usize) -> Result<Vec<QueuedMessage>, QueueBackendError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let key = self.queue_key(receiver_id);
        let stop = isize::try_from(limit).unwrap_or(isize::MAX) - 1;
        let raw = self.pool.lrange(&key, 0, stop).await?;

        Ok(Self::decode_entries(&key, raw))
    }

    async fn queue_size(&self, receiver_id: UserId) -> Result<usize, QueueBackendError> {
        let key = self.queue_key(receiver_id);
        Ok(self.pool.llen(&key).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RedisConfig;
    use crate::delivery::ChatMessage;

    fn create_backend(prefix: &str) -> RedisQueueBackend {
        // No connection is opened until a command runs
        let pool = Arc::new(RedisPool::new(RedisConfig::default()).unwrap());
        RedisQueueBackend::new(pool, prefix.to_string())
    }

    #[test]
    fn test_queue_key_generation() {
        let backend = create_backend("offline");
        assert_eq!(backend.queue_key(2), "offline:2");

        let backend = create_backend("chat:offline");
        assert_eq!(backend.queue_key(12345), "chat:offline:12345");
    }

    #[test]
    fn test_decode_skips_malformed_entries() {
        let good = serde_json::to_string(&QueuedMessage::from(&ChatMessage::new(1, 2, "hi"))).unwrap();
        let raw = vec![good, "1:legacy".to_string(), "{}".to_string()];

        let decoded = RedisQueueBackend::decode_entries("offline:2", raw);
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].sender_id, 1);
        assert_eq!(decoded[0].body, "hi");
    }

    #[test]
    fn test_backend_type() {
        assert_eq!(create_backend("offline").backend_type(), "redis");
    }
}
