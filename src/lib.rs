//! nmq: a minimal message queue on Redis lists.
//!
//! ```no_run
//! use std::sync::Arc;
//! use nmq::{Message, Queue, QueueConfig};
//!
//! # async fn demo() -> nmq::Result<()> {
//! let mut config = QueueConfig::named("orders");
//! config.channels = vec!["orders".to_string()];
//!
//! let queue = Queue::new(config).await?;
//! queue
//!     .add_consumer("logger", |msg: Arc<Message>| async move {
//!         println!("{}", msg);
//!     })
//!     .await?;
//! let engine = queue.start().await?;
//!
//! queue.publish("orders", "p1").await?;
//! engine.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod metrics;
pub mod queue;
pub mod redis;
pub mod store;
pub mod telemetry;

pub use config::{DispatchConfig, DuplicatePolicy, OverflowPolicy, QueueConfig, Settings};
pub use error::{QueueError, Result};
pub use queue::{
    Consumer, CycleReport, DeliveryError, EngineHandle, EngineHealthStats, EngineStatus, Message,
    Queue, QueueEvent, ShutdownResult,
};
pub use store::{MemoryStore, MessageStore, RedisStore, StoreError};
