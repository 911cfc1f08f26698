//! Durable message history.
//!
//! Every message is written here before any delivery is attempted.

mod factory;
pub mod memory_store;
pub mod postgres_store;
mod store;

pub use factory::create_message_store;
pub use memory_store::MemoryMessageStore;
pub use postgres_store::PostgresMessageStore;
pub use store::{MessageStore, MessageStoreError};
