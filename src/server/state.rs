use std::sync::Arc;
use std::time::Instant;

use tokio::sync::broadcast;

use crate::config::Settings;
use crate::delivery::DeliveryCoordinator;
use crate::history::MessageStore;
use crate::postgres::PostgresPool;
use crate::presence::PresenceRegistry;
use crate::queue::MessageQueueBackend;
use crate::redis::RedisPool;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub coordinator: Arc<DeliveryCoordinator>,
    pub redis_pool: Option<Arc<RedisPool>>,
    pub postgres_pool: Option<PostgresPool>,
    /// Fires once when the server begins graceful shutdown
    pub shutdown: broadcast::Sender<()>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        settings: Settings,
        queue: Arc<dyn MessageQueueBackend>,
        store: Arc<dyn MessageStore>,
    ) -> Self {
        let presence = Arc::new(PresenceRegistry::new());
        let coordinator = Arc::new(DeliveryCoordinator::new(presence, queue, store));
        let (shutdown, _) = broadcast::channel(1);

        Self {
            settings: Arc::new(settings),
            coordinator,
            redis_pool: None,
            postgres_pool: None,
            shutdown,
            start_time: Instant::now(),
        }
    }

    pub fn with_redis_pool(mut self, pool: Arc<RedisPool>) -> Self {
        self.redis_pool = Some(pool);
        self
    }

    pub fn with_postgres_pool(mut self, pool: PostgresPool) -> Self {
        self.postgres_pool = Some(pool);
        self
    }
}
