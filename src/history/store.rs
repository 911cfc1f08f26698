//! Durable message history abstraction.

use async_trait::async_trait;
use thiserror::Error;

use crate::delivery::ChatMessage;

/// Errors from the durable message store.
#[derive(Debug, Error)]
pub enum MessageStoreError {
    /// PostgreSQL operation failed
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// Store cannot accept writes right now
    #[error("Message store unavailable: {0}")]
    Unavailable(String),
}

/// Append-only record of every accepted message.
///
/// A successful `append_message` means the message is durable; the
/// delivery path only runs after it returns `Ok`.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Backend type identifier (for logs and stats).
    fn backend_type(&self) -> &'static str;

    async fn append_message(&self, message: &ChatMessage) -> Result<(), MessageStoreError>;
}
