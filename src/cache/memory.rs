use crate::cache::{CacheResult, FastCounterStore};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
struct Slot {
    value: i64,
    expires_at: Option<Instant>,
}

impl Slot {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// In-process counter store.
///
/// Expiry is lazy: an expired slot is dropped the next time it is touched,
/// there is no background sweep. Per-key atomicity comes from the DashMap
/// shard lock held by the entry API.
pub struct MemoryCounterStore {
    slots: DashMap<String, Slot>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
        }
    }

    fn live_slot(&self, key: &str) -> Option<Slot> {
        let now = Instant::now();
        let slot = *self.slots.get(key)?;
        if slot.is_expired(now) {
            self.slots.remove_if(key, |_, s| s.is_expired(now));
            return None;
        }
        Some(slot)
    }
}

impl Default for MemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FastCounterStore for MemoryCounterStore {
    async fn get(&self, key: &str) -> CacheResult<Option<i64>> {
        Ok(self.live_slot(key).map(|slot| slot.value))
    }

    async fn set(&self, key: &str, value: i64, ttl: Option<Duration>) -> CacheResult<()> {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.slots
            .insert(key.to_string(), Slot { value, expires_at });
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: i64) -> CacheResult<bool> {
        let now = Instant::now();
        match self.slots.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    occupied.insert(Slot {
                        value,
                        expires_at: None,
                    });
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Slot {
                    value,
                    expires_at: None,
                });
                Ok(true)
            }
        }
    }

    async fn increment(&self, key: &str) -> CacheResult<i64> {
        let now = Instant::now();
        let mut slot = self.slots.entry(key.to_string()).or_insert(Slot {
            value: 0,
            expires_at: None,
        });
        if slot.is_expired(now) {
            *slot = Slot {
                value: 0,
                expires_at: None,
            };
        }
        slot.value += 1;
        Ok(slot.value)
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        Ok(self.live_slot(key).is_some())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.slots.remove(key);
        Ok(())
    }

    async fn ttl(&self, key: &str) -> CacheResult<Option<Duration>> {
        let now = Instant::now();
        Ok(self
            .live_slot(key)
            .and_then(|slot| slot.expires_at)
            .map(|at| at.saturating_duration_since(now)))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_increment_starts_from_zero() {
        let store = MemoryCounterStore::new();
        assert_eq!(store.get("views:a").await.unwrap(), None);
        assert_eq!(store.increment("views:a").await.unwrap(), 1);
        assert_eq!(store.increment("views:a").await.unwrap(), 2);
        assert_eq!(store.get("views:a").await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn test_set_if_absent_keeps_existing_value() {
        let store = MemoryCounterStore::new();
        assert!(store.set_if_absent("k", 10).await.unwrap());
        assert!(!store.set_if_absent("k", 99).await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), Some(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_is_checked_on_read() {
        let store = MemoryCounterStore::new();
        store
            .set("cooldown:x", 1, Some(Duration::from_secs(300)))
            .await
            .unwrap();
        assert!(store.exists("cooldown:x").await.unwrap());
        assert_eq!(
            store.ttl("cooldown:x").await.unwrap(),
            Some(Duration::from_secs(300))
        );

        tokio::time::advance(Duration::from_secs(299)).await;
        assert!(store.exists("cooldown:x").await.unwrap());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(!store.exists("cooldown:x").await.unwrap());
        assert_eq!(store.get("cooldown:x").await.unwrap(), None);
        assert_eq!(store.ttl("cooldown:x").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_key_can_be_reused() {
        let store = MemoryCounterStore::new();
        store
            .set("k", 7, Some(Duration::from_secs(1)))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;

        assert_eq!(store.increment("k").await.unwrap(), 1);
        assert_eq!(store.ttl("k").await.unwrap(), None);
        store.delete("k").await.unwrap();
        assert!(store.set_if_absent("k", 3).await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_not_lost() {
        let store = Arc::new(MemoryCounterStore::new());
        let mut handles = vec![];

        for _ in 0..64 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.increment("views:hot").await.unwrap()
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.get("views:hot").await.unwrap(), Some(64));
    }
}
