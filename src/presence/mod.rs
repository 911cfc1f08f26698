//! Presence tracking for live delivery streams.

mod registry;
mod types;

pub use registry::PresenceRegistry;
pub use types::{ConnectionHandle, PresenceStats};
