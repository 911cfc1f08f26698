// Infrastructure layer (shared components)
pub mod infrastructure;

pub use infrastructure::config;
pub use infrastructure::error;
pub use infrastructure::metrics;
pub use infrastructure::postgres;
pub use infrastructure::redis;

// Domain layer
pub mod delivery;
pub mod history;
pub mod presence;
pub mod queue;

// Application layer
pub mod api;
pub mod server;
pub mod websocket;
