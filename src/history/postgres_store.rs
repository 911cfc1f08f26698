//! PostgreSQL-backed message history.
//!
//! Table structure:
//! - `messages` - one row per accepted message

use async_trait::async_trait;
use sqlx::PgPool;

use crate::delivery::ChatMessage;

use super::store::{MessageStore, MessageStoreError};

const CREATE_MESSAGES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS messages (
    id          BIGSERIAL PRIMARY KEY,
    sender_id   BIGINT NOT NULL,
    receiver_id BIGINT NOT NULL,
    content     TEXT NOT NULL,
    created_at  TIMESTAMPTZ NOT NULL
)
"#;

const CREATE_RECEIVER_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_messages_receiver_created
    ON messages (receiver_id, created_at)
"#;

pub struct PostgresMessageStore {
    pool: PgPool,
}

impl PostgresMessageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the `messages` table and its index if they do not exist.
    pub async fn ensure_schema(&self) -> Result<(), MessageStoreError> {
        sqlx::query(CREATE_MESSAGES_TABLE).execute(&self.pool).await?;
        sqlx::query(CREATE_RECEIVER_INDEX).execute(&self.pool).await?;

        tracing::info!("Message history schema ready");
        Ok(())
    }
}

#[async_trait]
impl MessageStore for PostgresMessageStore {
    fn backend_type(&self) -> &'static str {
        "postgres"
    }

    async fn append_message(&self, message: &ChatMessage) -> Result<(), MessageStoreError> {
        sqlx::query(
            r#"
            INSERT INTO messages (sender_id, receiver_id, content, created_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(message.sender_id)
        .bind(message.receiver_id)
        .bind(&message.body)
        .bind(message.timestamp)
        .execute(&self.pool)
        .await?;

        tracing::trace!(
            sender_id = message.sender_id,
            receiver_id = message.receiver_id,
            "Message stored in PostgreSQL"
        );

        Ok(())
    }
}
