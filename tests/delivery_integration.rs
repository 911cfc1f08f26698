//! Delivery integration tests
//!
//! Exercise the coordinator, presence registry, offline queue and message
//! history together, using the in-memory backends so no Redis or
//! PostgreSQL is needed.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_test::assert_ok;

use chat_relay_service::config::QueueConfig;
use chat_relay_service::delivery::{
    ChatMessage, DeliveryCoordinator, DeliveryError, PushOutcome, SendOutcome, UserId,
};
use chat_relay_service::history::{MemoryMessageStore, MessageStore, MessageStoreError};
use chat_relay_service::presence::PresenceRegistry;
use chat_relay_service::queue::{create_queue_backend, MessageQueueBackend};

struct TestEnvironment {
    coordinator: Arc<DeliveryCoordinator>,
    queue: Arc<dyn MessageQueueBackend>,
    store: Arc<MemoryMessageStore>,
}

fn create_test_environment() -> TestEnvironment {
    let queue_config = QueueConfig {
        backend: "memory".to_string(),
        key_prefix: "offline".to_string(),
    };
    let queue = create_queue_backend(&queue_config, None);
    let store = Arc::new(MemoryMessageStore::new());

    let coordinator = Arc::new(DeliveryCoordinator::new(
        Arc::new(PresenceRegistry::new()),
        queue.clone(),
        store.clone(),
    ));

    TestEnvironment {
        coordinator,
        queue,
        store,
    }
}

/// A history store whose writes always fail
struct UnavailableStore;

#[async_trait]
impl MessageStore for UnavailableStore {
    fn backend_type(&self) -> &'static str {
        "unavailable"
    }

    async fn append_message(&self, _message: &ChatMessage) -> Result<(), MessageStoreError> {
        Err(MessageStoreError::Unavailable("connection refused".into()))
    }
}

fn connect(
    coordinator: &Arc<DeliveryCoordinator>,
    user_id: UserId,
    capacity: usize,
) -> (JoinHandle<Result<(), DeliveryError>>, mpsc::Receiver<ChatMessage>) {
    let (tx, rx) = mpsc::channel(capacity);
    let coordinator = coordinator.clone();
    let stream = tokio::spawn(async move { coordinator.open_delivery_stream(user_id, tx).await });
    (stream, rx)
}

async fn wait_until_online(coordinator: &DeliveryCoordinator, user_id: UserId) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !coordinator.is_online(user_id) {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("user did not come online in time");
}

async fn wait_until_offline(coordinator: &DeliveryCoordinator, user_id: UserId) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while coordinator.is_online(user_id) {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("user did not go offline in time");
}

async fn queued_bodies(queue: &Arc<dyn MessageQueueBackend>, user_id: UserId) -> Vec<String> {
    queue
        .peek(user_id, usize::MAX)
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.body)
        .collect()
}

fn drain_channel(rx: &mut mpsc::Receiver<ChatMessage>) -> Vec<ChatMessage> {
    let mut received = Vec::new();
    while let Ok(message) = rx.try_recv() {
        received.push(message);
    }
    received
}

// ============================================================================
// Send path
// ============================================================================

#[tokio::test]
async fn test_failed_persistence_neither_queues_nor_pushes() {
    let queue = create_queue_backend(&QueueConfig::default(), None);
    let coordinator = Arc::new(DeliveryCoordinator::new(
        Arc::new(PresenceRegistry::new()),
        queue.clone(),
        Arc::new(UnavailableStore),
    ));

    // Offline receiver
    let result = coordinator.send_message(1, 2, "lost?").await;
    assert!(matches!(result, Err(DeliveryError::Persistence(_))));
    assert_eq!(queue.queue_size(2).await.unwrap(), 0);

    // Online receiver
    let (tx, mut rx) = mpsc::channel(8);
    let _handle = coordinator.presence().register(3, tx);
    let result = coordinator.send_message(1, 3, "lost?").await;
    assert!(matches!(result, Err(DeliveryError::Persistence(_))));

    tokio::task::yield_now().await;
    assert!(rx.try_recv().is_err());
    assert_eq!(queue.queue_size(3).await.unwrap(), 0);
}

#[tokio::test]
async fn test_online_receiver_never_touches_queue() {
    let env = create_test_environment();
    let (stream, mut rx) = connect(&env.coordinator, 2, 16);
    wait_until_online(&env.coordinator, 2).await;

    for i in 0..5 {
        let outcome = assert_ok!(env.coordinator.send_message(1, 2, format!("msg-{i}")).await);
        let SendOutcome::Pushed(push) = outcome else {
            panic!("online receiver should get a live push");
        };
        assert_eq!(push.await.unwrap(), PushOutcome::Delivered);
        assert_eq!(env.queue.queue_size(2).await.unwrap(), 0);
    }

    let bodies: Vec<String> = drain_channel(&mut rx).into_iter().map(|m| m.body).collect();
    assert_eq!(bodies, vec!["msg-0", "msg-1", "msg-2", "msg-3", "msg-4"]);

    drop(rx);
    assert_ok!(stream.await.unwrap());
}

#[tokio::test]
async fn test_offline_receiver_is_queued_and_stored() {
    let env = create_test_environment();

    let outcome = assert_ok!(env.coordinator.send_message(1, 2, "hi").await);
    assert!(matches!(outcome, SendOutcome::Queued));

    let drained = env.queue.drain_all(2).await.unwrap();
    assert_eq!(drained.len(), 1);
    assert_eq!(drained[0].sender_id, 1);
    assert_eq!(drained[0].body, "hi");

    // History has it regardless of the delivery route
    assert_eq!(env.store.messages_for(2).await.len(), 1);
}

// ============================================================================
// Delivery stream
// ============================================================================

#[tokio::test]
async fn test_reconnect_flushes_queue_in_order() {
    let env = create_test_environment();
    let bodies: Vec<String> = (1..=20).map(|i| format!("m{i}")).collect();
    for body in &bodies {
        assert_ok!(env.coordinator.send_message(1, 2, body.clone()).await);
    }

    let (stream, mut rx) = connect(&env.coordinator, 2, 32);

    let mut delivered = Vec::new();
    for _ in 0..bodies.len() {
        let message = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        delivered.push(message.body);
    }
    assert_eq!(delivered, bodies);
    assert_eq!(env.queue.queue_size(2).await.unwrap(), 0);

    drop(rx);
    assert_ok!(stream.await.unwrap());
    assert!(!env.coordinator.is_online(2));
}

#[tokio::test]
async fn test_queued_message_keeps_send_timestamp() {
    let env = create_test_environment();
    assert_ok!(env.coordinator.send_message(1, 2, "early").await);
    let stored = env.store.messages_for(2).await;

    tokio::time::sleep(Duration::from_millis(10)).await;
    let (_stream, mut rx) = connect(&env.coordinator, 2, 4);
    let delivered = rx.recv().await.unwrap();

    assert_eq!(delivered.timestamp, stored[0].timestamp);
}

#[tokio::test]
async fn test_send_receive_scenario() {
    let env = create_test_environment();

    // Receiver offline
    assert_ok!(env.coordinator.send_message(1, 2, "hi").await);
    let queued = env.queue.peek(2, 10).await.unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!((queued[0].sender_id, queued[0].body.as_str()), (1, "hi"));

    // Receiver connects and gets the backlog
    let (stream, mut rx) = connect(&env.coordinator, 2, 8);
    let first = rx.recv().await.unwrap();
    assert_eq!((first.sender_id, first.body.as_str()), (1, "hi"));
    assert_eq!(env.queue.queue_size(2).await.unwrap(), 0);
    assert!(!stream.is_finished());

    // Then live delivery
    let SendOutcome::Pushed(push) = assert_ok!(env.coordinator.send_message(1, 2, "again").await) else {
        panic!("receiver is online");
    };
    assert_eq!(push.await.unwrap(), PushOutcome::Delivered);
    let second = rx.recv().await.unwrap();
    assert_eq!(second.body, "again");
    assert_eq!(env.queue.queue_size(2).await.unwrap(), 0);

    drop(rx);
    assert_ok!(stream.await.unwrap());
}

#[tokio::test]
async fn test_push_to_departed_connection_is_requeued() {
    let env = create_test_environment();
    let (tx, rx) = mpsc::channel(8);
    let handle = env.coordinator.presence().register(2, tx);

    // Connection is gone but not yet unregistered
    drop(rx);
    assert!(handle.is_closed());

    let SendOutcome::Pushed(push) = assert_ok!(env.coordinator.send_message(1, 2, "late").await) else {
        panic!("registry still lists the receiver");
    };
    assert_eq!(push.await.unwrap(), PushOutcome::Requeued);
    assert_eq!(queued_bodies(&env.queue, 2).await, vec!["late"]);

    // Delivered on the next connection
    env.coordinator.presence().unregister(2, handle.id);
    let (_stream, mut rx) = connect(&env.coordinator, 2, 8);
    assert_eq!(rx.recv().await.unwrap().body, "late");
}

#[tokio::test]
async fn test_disconnect_during_flush_keeps_unsent_messages() {
    let env = create_test_environment();
    for body in ["a", "b", "c", "d"] {
        assert_ok!(env.coordinator.send_message(1, 2, body).await);
    }

    // One slot: "a" fits, the flush then waits on "b"
    let (stream, rx) = connect(&env.coordinator, 2, 1);
    tokio::time::sleep(Duration::from_millis(50)).await;
    drop(rx);

    let result = stream.await.unwrap();
    assert!(matches!(result, Err(DeliveryError::ChannelClosed { user_id: 2 })));
    assert_eq!(queued_bodies(&env.queue, 2).await, vec!["b", "c", "d"]);
    assert!(!env.coordinator.is_online(2));

    // Messages queued meanwhile land behind the restored ones
    assert_ok!(env.coordinator.send_message(1, 2, "e").await);
    assert_eq!(queued_bodies(&env.queue, 2).await, vec!["b", "c", "d", "e"]);
}

// ============================================================================
// Presence churn
// ============================================================================

#[tokio::test]
async fn test_stale_disconnect_keeps_newer_connection() {
    let registry = PresenceRegistry::new();
    let (tx1, _rx1) = mpsc::channel(1);
    let (tx2, _rx2) = mpsc::channel(1);

    let first = registry.register(7, tx1);
    let second = registry.register(7, tx2);

    assert!(!registry.unregister(7, first.id));
    assert_eq!(registry.lookup(7).unwrap().id, second.id);
    assert!(registry.unregister(7, second.id));
    assert!(!registry.is_online(7));
}

#[tokio::test]
async fn test_replaced_stream_ends_without_removing_successor() {
    let env = create_test_environment();

    let (first, rx1) = connect(&env.coordinator, 4, 8);
    wait_until_online(&env.coordinator, 4).await;
    let (second, mut rx2) = connect(&env.coordinator, 4, 8);
    tokio::time::sleep(Duration::from_millis(20)).await;

    drop(rx1);
    assert_ok!(first.await.unwrap());
    assert!(env.coordinator.is_online(4));

    // New traffic goes to the newer connection
    let SendOutcome::Pushed(push) = assert_ok!(env.coordinator.send_message(1, 4, "to-second").await) else {
        panic!("receiver is online");
    };
    assert_eq!(push.await.unwrap(), PushOutcome::Delivered);
    assert_eq!(rx2.recv().await.unwrap().body, "to-second");

    drop(rx2);
    assert_ok!(second.await.unwrap());
    wait_until_offline(&env.coordinator, 4).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_send_racing_connect_is_not_lost() {
    let env = create_test_environment();

    for user_id in 100..150 {
        let sender = {
            let coordinator = env.coordinator.clone();
            tokio::spawn(async move { coordinator.send_message(1, user_id, "racing").await })
        };
        let (_stream, mut rx) = connect(&env.coordinator, user_id, 8);

        if let SendOutcome::Pushed(push) = assert_ok!(sender.await.unwrap()) {
            assert_eq!(push.await.unwrap(), PushOutcome::Delivered);
        }
        wait_until_online(&env.coordinator, user_id).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        // Either delivered, or left in the queue for the next connection
        let delivered = drain_channel(&mut rx).len();
        let queued = env.queue.queue_size(user_id).await.unwrap();
        assert_eq!(delivered + queued, 1, "user {user_id}");
    }
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_sends_with_connection_churn() {
    const RECEIVERS: i64 = 50;
    const SENDS: i64 = 1000;
    const PER_RECEIVER: usize = (SENDS / RECEIVERS) as usize;

    let env = create_test_environment();

    // 1..=20 stay online, 21..=40 stay offline, 41..=50 churn
    let online: Vec<UserId> = (1..=20).collect();
    let offline: Vec<UserId> = (21..=40).collect();
    let churning: Vec<UserId> = (41..=RECEIVERS).collect();

    let mut online_streams = Vec::new();
    for &user_id in &online {
        let (stream, rx) = connect(&env.coordinator, user_id, 64);
        online_streams.push((user_id, stream, rx));
    }
    for &user_id in &online {
        wait_until_online(&env.coordinator, user_id).await;
    }

    let churn = {
        let coordinator = env.coordinator.clone();
        let churning = churning.clone();
        tokio::spawn(async move {
            let mut cycles = Vec::new();
            for cycle in 0..50 {
                let user_id = churning[cycle % churning.len()];
                let coordinator = coordinator.clone();
                cycles.push(tokio::spawn(async move {
                    let (stream, mut rx) = connect(&coordinator, user_id, 64);
                    tokio::time::sleep(Duration::from_millis((cycle % 5) as u64)).await;
                    drain_channel(&mut rx);
                    drop(rx);
                    // A flush cut short by the disconnect is an expected outcome
                    let _ = stream.await.unwrap();
                }));
            }
            for cycle in cycles {
                cycle.await.unwrap();
            }
        })
    };

    let mut sends = Vec::new();
    for i in 0..SENDS {
        let receiver = i % RECEIVERS + 1;
        let coordinator = env.coordinator.clone();
        sends.push(tokio::spawn(async move {
            let outcome = coordinator
                .send_message(1000 + i, receiver, format!("{i}"))
                .await;
            (receiver, outcome)
        }));
    }

    for send in sends {
        let (receiver, outcome) = send.await.unwrap();
        match assert_ok!(outcome) {
            SendOutcome::Pushed(push) => {
                let pushed = push.await.unwrap();
                if online.contains(&receiver) {
                    assert_eq!(pushed, PushOutcome::Delivered);
                }
            }
            SendOutcome::Queued => {
                assert!(!online.contains(&receiver), "online receiver {receiver} was queued");
            }
        }
    }
    churn.await.unwrap();

    assert_eq!(env.store.len().await, SENDS as usize);

    for &user_id in &offline {
        let bodies = queued_bodies(&env.queue, user_id).await;
        assert_eq!(bodies.len(), PER_RECEIVER, "offline receiver {user_id}");
        let unique: HashSet<_> = bodies.iter().collect();
        assert_eq!(unique.len(), PER_RECEIVER);
    }

    for (user_id, stream, mut rx) in online_streams {
        let bodies: Vec<String> = drain_channel(&mut rx).into_iter().map(|m| m.body).collect();
        let unique: HashSet<_> = bodies.iter().collect();
        assert_eq!(unique.len(), bodies.len(), "duplicate delivery to {user_id}");
        assert_eq!(bodies.len(), PER_RECEIVER);
        assert_eq!(env.queue.queue_size(user_id).await.unwrap(), 0);

        drop(rx);
        assert_ok!(stream.await.unwrap());
    }

    for &user_id in &churning {
        wait_until_offline(&env.coordinator, user_id).await;
    }
    assert_eq!(env.coordinator.presence().online_count(), 0);
}
