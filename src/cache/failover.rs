use crate::cache::{CacheError, CacheResult, FastCounterStore, MemoryCounterStore};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Wraps a networked store and switches to an in-process store the first time
/// the networked one is unreachable. The switch lasts for the rest of the
/// process lifetime and is only visible in the logs.
pub struct FailoverCounterStore {
    primary: Arc<dyn FastCounterStore>,
    fallback: MemoryCounterStore,
    degraded: AtomicBool,
}

impl FailoverCounterStore {
    pub fn new(primary: Arc<dyn FastCounterStore>) -> Self {
        Self {
            primary,
            fallback: MemoryCounterStore::new(),
            degraded: AtomicBool::new(false),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    /// Returns true when the caller should retry against the fallback.
    fn handle_error(&self, err: &CacheError) -> bool {
        if !err.is_unavailable() {
            return false;
        }
        if self
            .degraded
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            tracing::warn!(
                backend = self.primary.backend_name(),
                error = %err,
                "counter store unreachable, switching to in-memory store for the rest of the process"
            );
        }
        true
    }
}

macro_rules! route {
    ($self:ident, $store:ident => $call:expr) => {{
        if $self.is_degraded() {
            let $store = &$self.fallback;
            return $call.await;
        }
        let result = {
            let $store = &$self.primary;
            $call.await
        };
        match result {
            Err(err) if $self.handle_error(&err) => {
                let $store = &$self.fallback;
                $call.await
            }
            other => other,
        }
    }};
}

#[async_trait]
impl FastCounterStore for FailoverCounterStore {
    async fn get(&self, key: &str) -> CacheResult<Option<i64>> {
        route!(self, store => store.get(key))
    }

    async fn set(&self, key: &str, value: i64, ttl: Option<Duration>) -> CacheResult<()> {
        route!(self, store => store.set(key, value, ttl))
    }

    async fn set_if_absent(&self, key: &str, value: i64) -> CacheResult<bool> {
        route!(self, store => store.set_if_absent(key, value))
    }

    async fn increment(&self, key: &str) -> CacheResult<i64> {
        route!(self, store => store.increment(key))
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        route!(self, store => store.exists(key))
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        route!(self, store => store.delete(key))
    }

    async fn ttl(&self, key: &str) -> CacheResult<Option<Duration>> {
        route!(self, store => store.ttl(key))
    }

    fn backend_name(&self) -> &'static str {
        if self.is_degraded() {
            self.fallback.backend_name()
        } else {
            self.primary.backend_name()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Memory store that starts failing every call once `outage` is set.
    struct FlakyStore {
        inner: MemoryCounterStore,
        outage: AtomicBool,
    }

    impl FlakyStore {
        fn check(&self) -> CacheResult<()> {
            if self.outage.load(Ordering::SeqCst) {
                Err(CacheError::Unavailable("connection refused".into()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl FastCounterStore for FlakyStore {
        async fn get(&self, key: &str) -> CacheResult<Option<i64>> {
            self.check()?;
            self.inner.get(key).await
        }
        async fn set(&self, key: &str, value: i64, ttl: Option<Duration>) -> CacheResult<()> {
            self.check()?;
            self.inner.set(key, value, ttl).await
        }
        async fn set_if_absent(&self, key: &str, value: i64) -> CacheResult<bool> {
            self.check()?;
            self.inner.set_if_absent(key, value).await
        }
        async fn increment(&self, key: &str) -> CacheResult<i64> {
            self.check()?;
            self.inner.increment(key).await
        }
        async fn exists(&self, key: &str) -> CacheResult<bool> {
            self.check()?;
            self.inner.exists(key).await
        }
        async fn delete(&self, key: &str) -> CacheResult<()> {
            self.check()?;
            self.inner.delete(key).await
        }
        async fn ttl(&self, key: &str) -> CacheResult<Option<Duration>> {
            self.check()?;
            self.inner.ttl(key).await
        }
        fn backend_name(&self) -> &'static str {
            "flaky"
        }
    }

    fn flaky() -> Arc<FlakyStore> {
        Arc::new(FlakyStore {
            inner: MemoryCounterStore::new(),
            outage: AtomicBool::new(false),
        })
    }

    #[tokio::test]
    async fn test_uses_primary_while_healthy() {
        let primary = flaky();
        let store = FailoverCounterStore::new(primary.clone());

        assert_eq!(store.increment("views:a").await.unwrap(), 1);
        assert_eq!(primary.inner.get("views:a").await.unwrap(), Some(1));
        assert!(!store.is_degraded());
        assert_eq!(store.backend_name(), "flaky");
    }

    #[tokio::test]
    async fn test_switches_permanently_on_outage() {
        let primary = flaky();
        let store = FailoverCounterStore::new(primary.clone());
        store.increment("views:a").await.unwrap();

        primary.outage.store(true, Ordering::SeqCst);
        // The failing call is transparently retried on the fallback.
        assert_eq!(store.increment("views:a").await.unwrap(), 1);
        assert!(store.is_degraded());
        assert_eq!(store.backend_name(), "memory");

        // Recovery of the primary does not switch back.
        primary.outage.store(false, Ordering::SeqCst);
        assert_eq!(store.increment("views:a").await.unwrap(), 2);
        assert_eq!(primary.inner.get("views:a").await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_non_connection_errors_are_returned() {
        struct Broken;

        #[async_trait]
        impl FastCounterStore for Broken {
            async fn get(&self, key: &str) -> CacheResult<Option<i64>> {
                Err(CacheError::InvalidValue {
                    key: key.to_string(),
                })
            }
            async fn set(&self, _: &str, _: i64, _: Option<Duration>) -> CacheResult<()> {
                Ok(())
            }
            async fn set_if_absent(&self, _: &str, _: i64) -> CacheResult<bool> {
                Ok(true)
            }
            async fn increment(&self, _: &str) -> CacheResult<i64> {
                Ok(1)
            }
            async fn exists(&self, _: &str) -> CacheResult<bool> {
                Ok(false)
            }
            async fn delete(&self, _: &str) -> CacheResult<()> {
                Ok(())
            }
            async fn ttl(&self, _: &str) -> CacheResult<Option<Duration>> {
                Ok(None)
            }
            fn backend_name(&self) -> &'static str {
                "broken"
            }
        }

        let store = FailoverCounterStore::new(Arc::new(Broken));
        let err = store.get("views:a").await.unwrap_err();
        assert!(matches!(err, CacheError::InvalidValue { .. }));
        assert!(!store.is_degraded());
    }
}
