//! Offline message queue.
//!
//! Messages for receivers without a live connection are appended to a
//! per-receiver FIFO and flushed when the receiver reconnects.
//!
//! # Architecture
//!
//! - `MemoryQueueBackend`: In-memory storage using DashMap
//! - `RedisQueueBackend`: Persistent storage using Redis lists
//!
//! Use `create_queue_backend()` to pick one from configuration.

pub mod backend;
mod factory;
pub mod memory_backend;
pub mod redis_backend;

pub use backend::{MessageQueueBackend, QueueBackendError, QueuedMessage};
pub use factory::create_queue_backend;
pub use memory_backend::MemoryQueueBackend;
pub use redis_backend::RedisQueueBackend;
