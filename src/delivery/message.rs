//! Chat message value type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Numeric user identity shared by senders and receivers.
pub type UserId = i64;

/// A chat message from one user to another.
///
/// Created once at send time and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub body: String,
    /// When the message was sent
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    /// Create a message stamped with the current time.
    pub fn new(sender_id: UserId, receiver_id: UserId, body: impl Into<String>) -> Self {
        Self {
            sender_id,
            receiver_id,
            body: body.into(),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_assigns_timestamp() {
        let before = Utc::now();
        let msg = ChatMessage::new(1, 2, "hi");
        assert_eq!(msg.sender_id, 1);
        assert_eq!(msg.receiver_id, 2);
        assert_eq!(msg.body, "hi");
        assert!(msg.timestamp >= before);
    }
}
