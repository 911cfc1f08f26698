use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::delivery::{ChatMessage, UserId};
use crate::metrics::USERS_ONLINE;

use super::types::{ConnectionHandle, PresenceStats};

/// Tracks which users currently have a live outbound channel.
///
/// At most one handle per user. A new registration replaces the previous
/// handle unconditionally; the replaced connection finds out about its own
/// termination independently.
///
/// The map is sharded by user id. Every operation touches a single shard
/// under its lock, so the external contract is the same as one global lock.
pub struct PresenceRegistry {
    /// user_id -> active connection
    users: DashMap<UserId, Arc<ConnectionHandle>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self {
            users: DashMap::new(),
        }
    }

    /// Install a new connection as the active handle for `user_id`.
    pub fn register(&self, user_id: UserId, sender: mpsc::Sender<ChatMessage>) -> Arc<ConnectionHandle> {
        let handle = Arc::new(ConnectionHandle::new(user_id, sender));

        if let Some(previous) = self.users.insert(user_id, handle.clone()) {
            tracing::info!(
                user_id = user_id,
                connection_id = %handle.id,
                replaced_connection_id = %previous.id,
                "Connection replaced an existing registration"
            );
        } else {
            tracing::info!(user_id = user_id, connection_id = %handle.id, "Connection registered");
        }

        USERS_ONLINE.set(self.users.len() as i64);
        handle
    }

    /// Remove the entry for `user_id` only if it still belongs to `connection_id`.
    ///
    /// A stale disconnect racing a newer registration is a no-op.
    /// Returns whether an entry was removed.
    pub fn unregister(&self, user_id: UserId, connection_id: Uuid) -> bool {
        let removed = self
            .users
            .remove_if(&user_id, |_, handle| handle.id == connection_id)
            .is_some();

        if removed {
            USERS_ONLINE.set(self.users.len() as i64);
            tracing::info!(user_id = user_id, connection_id = %connection_id, "Connection unregistered");
        } else {
            tracing::debug!(
                user_id = user_id,
                connection_id = %connection_id,
                "Skipped unregister, connection is no longer current"
            );
        }

        removed
    }

    pub fn is_online(&self, user_id: UserId) -> bool {
        self.users.contains_key(&user_id)
    }

    /// Current handle for `user_id`, if any.
    pub fn lookup(&self, user_id: UserId) -> Option<Arc<ConnectionHandle>> {
        self.users.get(&user_id).map(|h| h.clone())
    }

    pub fn online_count(&self) -> usize {
        self.users.len()
    }

    pub fn stats(&self) -> PresenceStats {
        PresenceStats {
            online_users: self.users.len(),
        }
    }
}

impl Default for PresenceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
