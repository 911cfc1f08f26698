use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::history::{MessageStore, MessageStoreError};
use crate::metrics::{
    record_queue_error, record_route, DELIVERY_STREAM_DURATION, MESSAGES_ACCEPTED_TOTAL,
    MESSAGES_LOST_TOTAL, PERSIST_FAILURES_TOTAL, PUSH_DELIVERED_TOTAL, PUSH_FAILED_TOTAL,
    QUEUE_DRAINED_TOTAL, QUEUE_ENQUEUED_TOTAL, QUEUE_RESTORED_TOTAL,
};
use crate::presence::{ConnectionHandle, PresenceRegistry};
use crate::queue::{MessageQueueBackend, QueueBackendError, QueuedMessage};

use super::message::{ChatMessage, UserId};

/// Errors surfaced by the delivery coordinator.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The message could not be made durable; nothing else was attempted
    #[error("Failed to persist message: {0}")]
    Persistence(#[from] MessageStoreError),

    /// The offline queue could not be read on connect
    #[error("Failed to read offline queue: {0}")]
    QueueRead(#[source] QueueBackendError),

    /// The connection went away while queued messages were being flushed
    #[error("Connection for user {user_id} closed while flushing offline queue")]
    ChannelClosed { user_id: UserId },
}

/// How an accepted message is being delivered.
#[derive(Debug)]
pub enum SendOutcome {
    /// Handed to the receiver's live connection in a background task.
    ///
    /// Dropping the handle leaves the push running.
    Pushed(JoinHandle<PushOutcome>),
    /// Receiver was offline; appended to its offline queue
    Queued,
}

/// Final state of a background live push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Delivered,
    /// The connection was gone; the message went to the offline queue instead
    Requeued,
    /// Neither pushed nor queued. Still present in the message history.
    Lost,
}

/// Statistics for the delivery coordinator
#[derive(Debug, Default)]
pub struct DeliveryStats {
    pub accepted: AtomicU64,
    pub persist_failures: AtomicU64,
    pub pushed: AtomicU64,
    pub push_failed: AtomicU64,
    pub requeued: AtomicU64,
    pub queued: AtomicU64,
    pub drained: AtomicU64,
    pub restored: AtomicU64,
    pub lost: AtomicU64,
    pub queue_errors: AtomicU64,
    pub streams_opened: AtomicU64,
}

impl DeliveryStats {
    pub fn snapshot(&self) -> DeliveryStatsSnapshot {
        DeliveryStatsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            persist_failures: self.persist_failures.load(Ordering::Relaxed),
            pushed: self.pushed.load(Ordering::Relaxed),
            push_failed: self.push_failed.load(Ordering::Relaxed),
            requeued: self.requeued.load(Ordering::Relaxed),
            queued: self.queued.load(Ordering::Relaxed),
            drained: self.drained.load(Ordering::Relaxed),
            restored: self.restored.load(Ordering::Relaxed),
            lost: self.lost.load(Ordering::Relaxed),
            queue_errors: self.queue_errors.load(Ordering::Relaxed),
            streams_opened: self.streams_opened.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of delivery statistics
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryStatsSnapshot {
    pub accepted: u64,
    pub persist_failures: u64,
    pub pushed: u64,
    pub push_failed: u64,
    pub requeued: u64,
    pub queued: u64,
    pub drained: u64,
    pub restored: u64,
    pub lost: u64,
    pub queue_errors: u64,
    pub streams_opened: u64,
}

/// Decides between live push and offline queueing, and runs the
/// connect / flush / relay / disconnect lifecycle of delivery streams.
pub struct DeliveryCoordinator {
    presence: Arc<PresenceRegistry>,
    queue: Arc<dyn MessageQueueBackend>,
    store: Arc<dyn MessageStore>,
    stats: Arc<DeliveryStats>,
}

impl DeliveryCoordinator {
    pub fn new(
        presence: Arc<PresenceRegistry>,
        queue: Arc<dyn MessageQueueBackend>,
        store: Arc<dyn MessageStore>,
    ) -> Self {
        Self {
            presence,
            queue,
            store,
            stats: Arc::new(DeliveryStats::default()),
        }
    }

    pub fn presence(&self) -> &Arc<PresenceRegistry> {
        &self.presence
    }

    pub fn queue(&self) -> &Arc<dyn MessageQueueBackend> {
        &self.queue
    }

    pub fn stats(&self) -> DeliveryStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn is_online(&self, user_id: UserId) -> bool {
        self.presence.is_online(user_id)
    }

    /// Persist a message, then push it live or queue it for later.
    ///
    /// `Ok` means the message is durable and accepted. Only a persistence
    /// failure is reported as an error; failures on the delivery path are
    /// logged and counted.
    #[tracing::instrument(name = "delivery.send_message", skip(self, body))]
    pub async fn send_message(
        &self,
        sender_id: UserId,
        receiver_id: UserId,
        body: impl Into<String>,
    ) -> Result<SendOutcome, DeliveryError> {
        let message = ChatMessage::new(sender_id, receiver_id, body);

        if let Err(e) = self.store.append_message(&message).await {
            PERSIST_FAILURES_TOTAL.inc();
            self.stats.persist_failures.fetch_add(1, Ordering::Relaxed);
            tracing::error!(error = %e, "Failed to persist message, send rejected");
            return Err(DeliveryError::Persistence(e));
        }

        MESSAGES_ACCEPTED_TOTAL.inc();
        self.stats.accepted.fetch_add(1, Ordering::Relaxed);

        match self.presence.lookup(receiver_id) {
            Some(handle) => {
                record_route("live");
                let push = tokio::spawn(push_live(
                    handle,
                    message,
                    self.queue.clone(),
                    self.stats.clone(),
                ));
                Ok(SendOutcome::Pushed(push))
            }
            None => {
                record_route("queued");
                self.enqueue_offline(&message).await;
                Ok(SendOutcome::Queued)
            }
        }
    }

    /// Append to the receiver's offline queue.
    ///
    /// A storage failure is logged but not returned: the message is already
    /// in the history and the send has been accepted.
    async fn enqueue_offline(&self, message: &ChatMessage) {
        match self
            .queue
            .enqueue(message.receiver_id, QueuedMessage::from(message))
            .await
        {
            Ok(()) => {
                QUEUE_ENQUEUED_TOTAL.inc();
                self.stats.queued.fetch_add(1, Ordering::Relaxed);
                tracing::info!(
                    receiver_id = message.receiver_id,
                    "Receiver offline, message queued"
                );
            }
            Err(e) => {
                record_queue_error("enqueue");
                self.stats.queue_errors.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    error = %e,
                    sender_id = message.sender_id,
                    receiver_id = message.receiver_id,
                    backend = self.queue.backend_type(),
                    "Failed to queue message for offline receiver, it is only in history"
                );
            }
        }
    }

    /// Serve a user's delivery stream until the connection ends.
    ///
    /// Registers `sender` as the user's live channel, flushes the offline
    /// queue through it in order, then waits until the receiving half is
    /// dropped. The registration is removed on every exit path, including
    /// when this future is dropped.
    #[tracing::instrument(name = "delivery.stream", skip(self, sender))]
    pub async fn open_delivery_stream(
        &self,
        user_id: UserId,
        sender: mpsc::Sender<ChatMessage>,
    ) -> Result<(), DeliveryError> {
        let handle = self.presence.register(user_id, sender);
        let _registration = Registration {
            presence: &self.presence,
            user_id,
            connection_id: handle.id,
            started: Instant::now(),
        };
        self.stats.streams_opened.fetch_add(1, Ordering::Relaxed);

        self.flush_offline_queue(&handle).await?;

        // New messages arrive through live pushes from here on
        handle.closed().await;

        tracing::info!(connection_id = %handle.id, "Delivery stream closed by peer");
        Ok(())
    }

    /// Forward everything queued for the handle's user, oldest first.
    ///
    /// On a failed forward the unsent remainder is put back at the head of
    /// the queue. Returns the number of messages forwarded.
    async fn flush_offline_queue(&self, handle: &ConnectionHandle) -> Result<usize, DeliveryError> {
        let user_id = handle.user_id;

        let drained = self.queue.drain_all(user_id).await.map_err(|e| {
            record_queue_error("drain");
            self.stats.queue_errors.fetch_add(1, Ordering::Relaxed);
            tracing::error!(error = %e, user_id = user_id, "Failed to drain offline queue");
            DeliveryError::QueueRead(e)
        })?;

        if drained.is_empty() {
            return Ok(0);
        }

        let total = drained.len();
        let mut pending = drained.into_iter();
        let mut forwarded = 0;

        while let Some(queued) = pending.next() {
            if let Err(mpsc::error::SendError(message)) =
                handle.send(queued.into_chat_message(user_id)).await
            {
                let mut undelivered = vec![QueuedMessage::from(&message)];
                undelivered.extend(pending);
                self.restore_undelivered(user_id, undelivered).await;

                tracing::warn!(
                    user_id = user_id,
                    forwarded = forwarded,
                    total = total,
                    "Connection closed while flushing offline queue"
                );
                return Err(DeliveryError::ChannelClosed { user_id });
            }

            forwarded += 1;
            QUEUE_DRAINED_TOTAL.inc();
            self.stats.drained.fetch_add(1, Ordering::Relaxed);
        }

        tracing::info!(user_id = user_id, forwarded = forwarded, "Flushed offline queue");
        Ok(forwarded)
    }

    /// Put messages that reached a connection's buffer but were never
    /// written out back at the head of the user's offline queue.
    ///
    /// `unsent` must be oldest first. Call after the delivery stream has
    /// ended so these land ahead of anything an interrupted flush restored.
    pub async fn return_unsent(&self, user_id: UserId, unsent: Vec<ChatMessage>) {
        if unsent.is_empty() {
            return;
        }

        tracing::warn!(
            user_id = user_id,
            count = unsent.len(),
            "Returning unsent messages to offline queue"
        );
        let queued = unsent.iter().map(QueuedMessage::from).collect();
        self.restore_undelivered(user_id, queued).await;
    }

    async fn restore_undelivered(&self, user_id: UserId, undelivered: Vec<QueuedMessage>) {
        let count = undelivered.len() as u64;

        match self.queue.restore(user_id, undelivered).await {
            Ok(()) => {
                QUEUE_RESTORED_TOTAL.inc_by(count);
                self.stats.restored.fetch_add(count, Ordering::Relaxed);
            }
            Err(e) => {
                record_queue_error("restore");
                MESSAGES_LOST_TOTAL.inc_by(count);
                self.stats.queue_errors.fetch_add(1, Ordering::Relaxed);
                self.stats.lost.fetch_add(count, Ordering::Relaxed);
                tracing::error!(
                    error = %e,
                    user_id = user_id,
                    lost = count,
                    "Failed to restore undelivered messages to offline queue"
                );
            }
        }
    }
}

/// Push one message to a live connection, falling back to the offline queue.
async fn push_live(
    handle: Arc<ConnectionHandle>,
    message: ChatMessage,
    queue: Arc<dyn MessageQueueBackend>,
    stats: Arc<DeliveryStats>,
) -> PushOutcome {
    let connection_id = handle.id;

    let message = match handle.send(message).await {
        Ok(()) => {
            PUSH_DELIVERED_TOTAL.inc();
            stats.pushed.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                receiver_id = handle.user_id,
                connection_id = %connection_id,
                "Message pushed to live connection"
            );
            return PushOutcome::Delivered;
        }
        Err(mpsc::error::SendError(message)) => message,
    };

    PUSH_FAILED_TOTAL.inc();
    stats.push_failed.fetch_add(1, Ordering::Relaxed);
    tracing::warn!(
        receiver_id = message.receiver_id,
        connection_id = %connection_id,
        "Live push failed, connection is gone; queueing message"
    );

    match queue
        .enqueue(message.receiver_id, QueuedMessage::from(&message))
        .await
    {
        Ok(()) => {
            QUEUE_ENQUEUED_TOTAL.inc();
            stats.requeued.fetch_add(1, Ordering::Relaxed);
            PushOutcome::Requeued
        }
        Err(e) => {
            record_queue_error("requeue");
            MESSAGES_LOST_TOTAL.inc();
            stats.queue_errors.fetch_add(1, Ordering::Relaxed);
            stats.lost.fetch_add(1, Ordering::Relaxed);
            tracing::error!(
                error = %e,
                sender_id = message.sender_id,
                receiver_id = message.receiver_id,
                "Failed to queue message after live push failure"
            );
            PushOutcome::Lost
        }
    }
}

/// Removes a stream's presence entry when the stream ends or is dropped.
struct Registration<'a> {
    presence: &'a PresenceRegistry,
    user_id: UserId,
    connection_id: Uuid,
    started: Instant,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.presence.unregister(self.user_id, self.connection_id);
        DELIVERY_STREAM_DURATION.observe(self.started.elapsed().as_secs_f64());
    }
}
