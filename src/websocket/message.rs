use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::delivery::{ChatMessage, UserId};

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "message")]
    Message {
        sender_id: UserId,
        receiver_id: UserId,
        body: String,
        timestamp: DateTime<Utc>,
    },
}

impl From<ChatMessage> for ServerMessage {
    fn from(message: ChatMessage) -> Self {
        Self::Message {
            sender_id: message.sender_id,
            receiver_id: message.receiver_id,
            body: message.body,
            timestamp: message.timestamp,
        }
    }
}
