mod settings;

pub use settings::{
    DispatchConfig, DuplicatePolicy, OtelConfig, OverflowPolicy, QueueConfig, RedisConfig,
    Settings,
};
