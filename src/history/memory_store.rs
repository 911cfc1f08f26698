//! In-memory message history, for development and tests.

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::delivery::{ChatMessage, UserId};

use super::store::{MessageStore, MessageStoreError};

/// Keeps every appended message in insertion order. Lost on restart.
pub struct MemoryMessageStore {
    messages: RwLock<Vec<ChatMessage>>,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self {
            messages: RwLock::new(Vec::new()),
        }
    }

    /// Stored messages addressed to `receiver_id`
    pub async fn messages_for(&self, receiver_id: UserId) -> Vec<ChatMessage> {
        self.messages
            .read()
            .await
            .iter()
            .filter(|m| m.receiver_id == receiver_id)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.messages.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.messages.read().await.is_empty()
    }
}

impl Default for MemoryMessageStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    fn backend_type(&self) -> &'static str {
        "memory"
    }

    async fn append_message(&self, message: &ChatMessage) -> Result<(), MessageStoreError> {
        self.messages.write().await.push(message.clone());
        Ok(())
    }
}
