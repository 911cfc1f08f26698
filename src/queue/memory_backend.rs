//! In-memory offline queue backend using DashMap.
//!
//! Messages are stored in memory and will be lost on service restart.

use std::collections::VecDeque;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::delivery::UserId;

use super::backend::{MessageQueueBackend, QueueBackendError, QueuedMessage};

/// In-memory offline queue backend.
///
/// Each receiver has a `VecDeque`. All operations on one receiver go through
/// its shard lock, which makes enqueue and drain mutually exclusive per key.
pub struct MemoryQueueBackend {
    queues: DashMap<UserId, VecDeque<QueuedMessage>>,
}

impl MemoryQueueBackend {
    pub fn new() -> Self {
        Self {
            queues: DashMap::new(),
        }
    }

    /// Total number of queued messages across all receivers
    #[cfg(test)]
    fn total_queued(&self) -> usize {
        self.queues.iter().map(|q| q.len()).sum()
    }
}

impl Default for MemoryQueueBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageQueueBackend for MemoryQueueBackend {
    fn backend_type(&self) -> &'static str {
        "memory"
    }

    async fn enqueue(&self, receiver_id: UserId, message: QueuedMessage) -> Result<(), QueueBackendError> {
        let mut queue = self.queues.entry(receiver_id).or_default();
        queue.push_back(message);

        tracing::debug!(
            receiver_id = receiver_id,
            queue_size = queue.len(),
            "Message enqueued for offline user"
        );

        Ok(())
    }

    async fn drain_all(&self, receiver_id: UserId) -> Result<Vec<QueuedMessage>, QueueBackendError> {
        // Removing the entry is the read and the clear in one step
        let messages: Vec<QueuedMessage> = self
            .queues
            .remove(&receiver_id)
            .map(|(_, queue)| queue.into())
            .unwrap_or_default();

        if !messages.is_empty() {
            tracing::debug!(
                receiver_id = receiver_id,
                message_count = messages.len(),
                "Drained offline queue"
            );
        }

        Ok(messages)
    }

    async fn restore(&self, receiver_id: UserId, messages: Vec<QueuedMessage>) -> Result<(), QueueBackendError> {
        if messages.is_empty() {
            return Ok(());
        }

        let mut queue = self.queues.entry(receiver_id).or_default();
        for message in messages.into_iter().rev() {
            queue.push_front(message);
        }

        Ok(())
    }

    async fn peek(&self, receiver_id: UserId, limit: usize) -> Result<Vec<QueuedMessage>, QueueBackendError> {
        Ok(self
            .queues
            .get(&receiver_id)
            .map(|q| q.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn queue_size(&self, receiver_id: UserId) -> Result<usize, QueueBackendError> {
        Ok(self.queues.get(&receiver_id).map(|q| q.len()).unwrap_or(0))
    }
}
