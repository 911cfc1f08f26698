//! Redis connectivity for the offline queue.
//!
//! - `pool`: shared multiplexed connection plus the list commands the queue uses

pub mod pool;

pub use pool::{PoolError, RedisListExt, RedisPool};
