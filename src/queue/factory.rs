//! Queue backend factory

use std::sync::Arc;

use crate::config::QueueConfig;
use crate::redis::RedisPool;

use super::backend::MessageQueueBackend;
use super::memory_backend::MemoryQueueBackend;
use super::redis_backend::RedisQueueBackend;

/// Create a queue backend based on configuration.
///
/// - `"redis"` (default): `RedisQueueBackend` if a Redis pool is provided
/// - `"memory"`: `MemoryQueueBackend`
///
/// A Redis request without a pool falls back to memory.
pub fn create_queue_backend(
    settings: &QueueConfig,
    redis_pool: Option<Arc<RedisPool>>,
) -> Arc<dyn MessageQueueBackend> {
    match settings.backend.as_str() {
        "redis" => {
            if let Some(pool) = redis_pool {
                tracing::info!(
                    backend = "redis",
                    prefix = %settings.key_prefix,
                    "Creating Redis queue backend"
                );
                Arc::new(RedisQueueBackend::new(pool, settings.key_prefix.clone()))
            } else {
                tracing::warn!(
                    "Redis queue backend requested but no pool provided, falling back to memory"
                );
                Arc::new(MemoryQueueBackend::new())
            }
        }
        "memory" => {
            tracing::info!(backend = "memory", "Creating memory queue backend");
            Arc::new(MemoryQueueBackend::new())
        }
        other => {
            tracing::warn!(backend = %other, "Unknown queue backend, using memory");
            Arc::new(MemoryQueueBackend::new())
        }
    }
}
