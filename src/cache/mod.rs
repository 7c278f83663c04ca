pub mod failover;
pub mod memory;
pub mod redis_store;
pub mod trait_def;

pub use failover::FailoverCounterStore;
pub use memory::MemoryCounterStore;
pub use redis_store::RedisCounterStore;
pub use trait_def::{CacheError, CacheResult, FastCounterStore};
