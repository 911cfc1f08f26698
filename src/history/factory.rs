//! Message store factory

use std::sync::Arc;

use crate::config::HistoryConfig;
use crate::postgres::PostgresPool;

use super::memory_store::MemoryMessageStore;
use super::postgres_store::PostgresMessageStore;
use super::store::{MessageStore, MessageStoreError};

/// Create the durable message store based on configuration.
///
/// - `"postgres"` (default): `PostgresMessageStore`; a pool is required
/// - `"memory"`: `MemoryMessageStore`, history does not survive restarts
///
/// A `postgres` request without a pool is an error. Sends must never be
/// acknowledged against a store weaker than the one configured.
pub fn create_message_store(
    settings: &HistoryConfig,
    postgres_pool: Option<&PostgresPool>,
) -> Result<Arc<dyn MessageStore>, MessageStoreError> {
    match (settings.backend.as_str(), postgres_pool) {
        ("postgres", Some(pool)) => {
            tracing::info!(
                backend = "postgres",
                url = %pool.database_url_masked(),
                "Creating PostgreSQL message store"
            );
            Ok(Arc::new(PostgresMessageStore::new(pool.pool().clone())))
        }
        ("postgres", None) => Err(MessageStoreError::Unavailable(
            "PostgreSQL message store configured but no connection pool is available".to_string(),
        )),
        ("memory", _) => {
            tracing::warn!(backend = "memory", "Creating memory message store, history will not survive restarts");
            Ok(Arc::new(MemoryMessageStore::new()))
        }
        (backend, _) => Err(MessageStoreError::Unavailable(format!(
            "unknown message store backend: {backend}"
        ))),
    }
}
