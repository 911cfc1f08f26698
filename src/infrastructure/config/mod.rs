mod settings;

pub use settings::{
    DatabaseConfig, HistoryConfig, QueueConfig, RedisConfig, ServerConfig, Settings,
    WebSocketConfig,
};
