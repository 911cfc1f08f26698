//! Redis connection pool for the offline queue storage.
//!
//! Holds a single multiplexed connection shared across tasks and drops it
//! whenever the server connection is lost, so the next command reconnects.

use std::future::Future;

use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, RedisError, RedisResult};
use tokio::sync::RwLock;

use crate::config::RedisConfig;

/// Error type for Redis pool operations.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// Redis operation failed
    #[error("Redis error: {0}")]
    Redis(#[from] RedisError),

    /// Connection not available
    #[error("Connection not available: {0}")]
    ConnectionUnavailable(String),
}

/// Redis connection pool for data operations.
pub struct RedisPool {
    /// Redis client for creating connections
    client: Client,

    /// Multiplexed connection (shared across tasks)
    connection: RwLock<Option<MultiplexedConnection>>,

    config: RedisConfig,
}

impl RedisPool {
    /// Create a new Redis pool. No connection is made until the first command.
    pub fn new(config: RedisConfig) -> Result<Self, PoolError> {
        let client = Client::open(config.url.as_str())?;

        Ok(Self {
            client,
            connection: RwLock::new(None),
            config,
        })
    }

    /// Get a connection from the pool.
    ///
    /// This will establish a new connection if none exists.
    pub async fn get_connection(&self) -> Result<MultiplexedConnection, PoolError> {
        {
            let conn = self.connection.read().await;
            if let Some(ref c) = *conn {
                return Ok(c.clone());
            }
        }

        self.connect().await
    }

    async fn connect(&self) -> Result<MultiplexedConnection, PoolError> {
        let mut conn_guard = self.connection.write().await;

        // Double-check in case another task connected while we waited
        if let Some(ref c) = *conn_guard {
            return Ok(c.clone());
        }

        match self.client.get_multiplexed_tokio_connection().await {
            Ok(conn) => {
                *conn_guard = Some(conn.clone());
                tracing::info!("Redis pool connection established");
                Ok(conn)
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to connect to Redis");
                Err(PoolError::ConnectionUnavailable(e.to_string()))
            }
        }
    }

    /// Execute a Redis command on a pooled connection.
    ///
    /// A dropped connection or I/O error clears the cached connection.
    pub async fn execute<F, T, Fut>(&self, f: F) -> Result<T, PoolError>
    where
        F: FnOnce(MultiplexedConnection) -> Fut,
        Fut: Future<Output = RedisResult<T>>,
    {
        let conn = self.get_connection().await?;

        match f(conn).await {
            Ok(result) => Ok(result),
            Err(e) => {
                if e.is_connection_dropped() || e.is_io_error() {
                    let mut conn_guard = self.connection.write().await;
                    *conn_guard = None;
                    tracing::warn!(error = %e, "Redis connection lost, will reconnect");
                }
                Err(PoolError::Redis(e))
            }
        }
    }

    /// Get the Redis URL (for debugging).
    pub fn url(&self) -> &str {
        &self.config.url
    }

    /// Ping Redis to check connectivity.
    pub async fn ping(&self) -> Result<(), PoolError> {
        self.execute(|mut conn| async move {
            let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
            Ok(pong)
        })
        .await?;
        Ok(())
    }
}

/// List commands used by the offline queue.
#[async_trait::async_trait]
pub trait RedisListExt {
    /// Append a value to the tail of a list.
    async fn rpush(&self, key: &str, value: &str) -> Result<(), PoolError>;

    /// Put values back at the head of a list, keeping their order.
    async fn push_front_ordered(&self, key: &str, values: Vec<String>) -> Result<(), PoolError>;

    /// Read a range of a list without removing anything.
    async fn lrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>, PoolError>;

    /// Length of a list.
    async fn llen(&self, key: &str) -> Result<usize, PoolError>;

    /// Read the whole list and delete it in one MULTI/EXEC transaction.
    async fn take_all(&self, key: &str) -> Result<Vec<String>, PoolError>;
}

#[async_trait::async_trait]
impl RedisListExt for RedisPool {
    async fn rpush(&self, key: &str, value: &str) -> Result<(), PoolError> {
        self.execute(|mut conn| async move { conn.rpush::<_, _, ()>(key, value).await })
            .await
    }

    async fn push_front_ordered(&self, key: &str, values: Vec<String>) -> Result<(), PoolError> {
        if values.is_empty() {
            return Ok(());
        }

        // LPUSH inserts one by one at the head, so push the batch back to front
        let reversed: Vec<String> = values.into_iter().rev().collect();

        self.execute(|mut conn| async move { conn.lpush::<_, _, ()>(key, reversed).await })
            .await
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>, PoolError> {
        self.execute(|mut conn| async move { conn.lrange(key, start, stop).await })
            .await
    }

    async fn llen(&self, key: &str) -> Result<usize, PoolError> {
        self.execute(|mut conn| async move { conn.llen(key).await })
            .await
    }

    async fn take_all(&self, key: &str) -> Result<Vec<String>, PoolError> {
        let (values,): (Vec<String>,) = self
            .execute(|mut conn| async move {
                redis::pipe()
                    .atomic()
                    .lrange(key, 0, -1)
                    .del(key)
                    .ignore()
                    .query_async(&mut conn)
                    .await
            })
            .await?;

        Ok(values)
    }
}
