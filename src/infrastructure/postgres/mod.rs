//! PostgreSQL persistence module.
//!
//! Provides connection pooling for the durable message history.

pub mod pool;

pub use pool::{PostgresPool, PostgresPoolError};
