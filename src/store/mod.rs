//! Backing store adapter.
//!
//! - `RedisStore`: Redis lists and sets (default)
//! - `MemoryStore`: process-local equivalent using DashMap
//!
//! Use `create_store()` to build the backend named in the configuration.

pub mod backend;
mod factory;
pub mod memory_backend;
pub mod redis_backend;

pub use backend::{MessageStore, StoreError};
pub use factory::create_store;
pub use memory_backend::MemoryStore;
pub use redis_backend::RedisStore;
