use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    /// The backend cannot be reached. Triggers the in-process failover.
    #[error("counter store unavailable: {0}")]
    Unavailable(String),
    #[error("value at '{key}' is not an integer")]
    InvalidValue { key: String },
    #[error("counter store error: {0}")]
    Backend(String),
}

impl CacheError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, CacheError::Unavailable(_))
    }
}

pub type CacheResult<T> = Result<T, CacheError>;

/// Key to integer store with atomic increment and expiring keys.
///
/// Implemented by Redis and by an in-process map; callers cannot tell the two
/// apart except through [`FastCounterStore::backend_name`].
#[async_trait]
pub trait FastCounterStore: Send + Sync {
    async fn get(&self, key: &str) -> CacheResult<Option<i64>>;

    /// Store `value`. `ttl = None` means the key never expires.
    async fn set(&self, key: &str, value: i64, ttl: Option<Duration>) -> CacheResult<()>;

    /// Store `value` only if the key does not exist. Returns whether it was written.
    async fn set_if_absent(&self, key: &str, value: i64) -> CacheResult<bool>;

    /// Atomically add one. A missing key counts as 0, so the first call yields 1.
    async fn increment(&self, key: &str) -> CacheResult<i64>;

    async fn exists(&self, key: &str) -> CacheResult<bool>;

    async fn delete(&self, key: &str) -> CacheResult<()>;

    /// Remaining lifetime. `None` when the key is missing or has no expiry.
    async fn ttl(&self, key: &str) -> CacheResult<Option<Duration>>;

    fn backend_name(&self) -> &'static str;
}
