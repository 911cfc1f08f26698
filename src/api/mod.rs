//! API layer - HTTP endpoint handlers.

mod health;
mod messages;
mod metrics;
mod routes;

pub use health::{health, stats};
pub use messages::{send_message, user_online, user_queue, SendMessageRequest, SendMessageResponse};
pub use metrics::prometheus_metrics;
pub use routes::api_routes;
