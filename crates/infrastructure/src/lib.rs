//! Infrastructure adapters for application ports.

#![forbid(unsafe_code)]

mod in_memory_lock_store;
mod redis_lock_store;
mod redis_store_config;

pub use in_memory_lock_store::InMemoryLockStore;
pub use redis_lock_store::RedisLockStore;
pub use redis_store_config::{DEFAULT_CONNECT_TIMEOUT, RedisStoreConfig};
