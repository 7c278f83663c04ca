//! Per-visitor cooldown on top of the fast store's expiring keys.
//!
//! The check and the mark are two separate store calls. Two identical requests
//! racing through the gap can both be counted; this double count is tolerated
//! and no lock is taken.

use std::sync::Arc;
use std::time::Duration;

use crate::cache::{CacheResult, FastCounterStore};

const COOLDOWN_SENTINEL: i64 = 1;

/// Counters are identified by their canonical key, which is available even
/// when the durable store (and with it the numeric id) is not.
pub fn cooldown_key(visitor_hash: &str, counter_key: &str) -> String {
    format!("cooldown:{visitor_hash}:{counter_key}")
}

#[derive(Clone)]
pub struct CooldownTracker {
    store: Arc<dyn FastCounterStore>,
}

impl CooldownTracker {
    pub fn new(store: Arc<dyn FastCounterStore>) -> Self {
        Self { store }
    }

    /// Returns `true` when the visitor was already seen within the window.
    /// Otherwise marks the visitor for `cooldown` and returns `false`.
    pub async fn check_and_mark(
        &self,
        visitor_hash: &str,
        counter_key: &str,
        cooldown: Duration,
    ) -> CacheResult<bool> {
        let key = cooldown_key(visitor_hash, counter_key);

        if self.store.exists(&key).await? {
            return Ok(true);
        }

        self.store
            .set(&key, COOLDOWN_SENTINEL, Some(cooldown))
            .await?;
        Ok(false)
    }

    /// Time left in the visitor's window, `None` when not in cooldown.
    pub async fn remaining(
        &self,
        visitor_hash: &str,
        counter_key: &str,
    ) -> CacheResult<Option<Duration>> {
        self.store.ttl(&cooldown_key(visitor_hash, counter_key)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCounterStore;

    const PROFILE: &str = "octocat:profile:main";
    const REPO: &str = "octocat:hello-world:main";

    fn tracker() -> (CooldownTracker, Arc<MemoryCounterStore>) {
        let store = Arc::new(MemoryCounterStore::new());
        (CooldownTracker::new(store.clone()), store)
    }

    #[tokio::test]
    async fn test_second_check_is_in_cooldown() {
        let (tracker, store) = tracker();
        let window = Duration::from_secs(300);

        assert!(!tracker.check_and_mark("abc", PROFILE, window).await.unwrap());
        assert!(tracker.check_and_mark("abc", PROFILE, window).await.unwrap());
        assert!(store
            .exists("cooldown:abc:octocat:profile:main")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_scoped_per_visitor_and_counter() {
        let (tracker, _) = tracker();
        let window = Duration::from_secs(300);

        assert!(!tracker.check_and_mark("abc", PROFILE, window).await.unwrap());
        assert!(!tracker.check_and_mark("abc", REPO, window).await.unwrap());
        assert!(!tracker.check_and_mark("def", PROFILE, window).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_expires() {
        let (tracker, _) = tracker();
        let window = Duration::from_secs(60);

        assert!(!tracker.check_and_mark("abc", PROFILE, window).await.unwrap());

        tokio::time::advance(Duration::from_secs(20)).await;
        assert_eq!(
            tracker.remaining("abc", PROFILE).await.unwrap(),
            Some(Duration::from_secs(40))
        );

        tokio::time::advance(Duration::from_secs(41)).await;
        assert_eq!(tracker.remaining("abc", PROFILE).await.unwrap(), None);
        assert!(!tracker.check_and_mark("abc", PROFILE, window).await.unwrap());
        assert!(tracker.check_and_mark("abc", PROFILE, window).await.unwrap());
    }
}
