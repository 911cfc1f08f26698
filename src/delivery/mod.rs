//! Message delivery.
//!
//! Routes each accepted message either to the receiver's live connection
//! or to its offline queue, and runs the per-connection delivery stream.

mod coordinator;
mod message;

pub use coordinator::{
    DeliveryCoordinator, DeliveryError, DeliveryStats, DeliveryStatsSnapshot, PushOutcome,
    SendOutcome,
};
pub use message::{ChatMessage, UserId};
