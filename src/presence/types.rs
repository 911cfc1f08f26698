//! Connection handle and related types

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::delivery::{ChatMessage, UserId};

/// Outbound channel for a user's live connection.
///
/// The transport owns the receiving half. Dropping it terminates the
/// connection from the registry's point of view.
#[derive(Debug)]
pub struct ConnectionHandle {
    /// Identity used to tell connections of the same user apart
    pub id: Uuid,
    pub user_id: UserId,
    pub sender: mpsc::Sender<ChatMessage>,
    pub connected_at: DateTime<Utc>,
}

impl ConnectionHandle {
    pub fn new(user_id: UserId, sender: mpsc::Sender<ChatMessage>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            sender,
            connected_at: Utc::now(),
        }
    }

    /// Hand a message to the connection.
    ///
    /// Waits for buffer space; fails once the receiving half is gone.
    pub async fn send(
        &self,
        message: ChatMessage,
    ) -> Result<(), mpsc::error::SendError<ChatMessage>> {
        self.sender.send(message).await
    }

    /// Resolves when the receiving half has been dropped.
    pub async fn closed(&self) {
        self.sender.closed().await
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Presence statistics
#[derive(Debug, Clone, Serialize)]
pub struct PresenceStats {
    pub online_users: usize,
}
