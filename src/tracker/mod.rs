//! View tracking engine.
//!
//! The fast counter store answers "what number do I show now"; the durable
//! store answers "what number do I show after the cache is lost". A counted
//! view updates the fast store first and reaches the durable store afterwards
//! through the [`Reconciler`], so the durable total may lag but is never
//! ahead. The fast key is only ever created on top of a known durable total.

pub mod reconcile;

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::bot::is_bot;
use crate::cache::{CacheError, FastCounterStore};
use crate::config::CounterConfig;
use crate::cooldown::CooldownTracker;
use crate::models::{CounterRecord, CounterSummary, CounterTarget, TargetError, ViewLogEntry};
use crate::stats::{self, CounterStats};
use crate::storage::Storage;

pub use reconcile::{AdminWrite, ReconcileJob, Reconciler};

/// Upper bound accepted by [`ViewTracker::set_initial_count`].
pub const MAX_INITIAL_COUNT: i64 = 999_999_999;

const VISITOR_HASH_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("invalid target: {0}")]
    InvalidTarget(#[from] TargetError),
    #[error("count must be between 0 and 999,999,999, got {0}")]
    InvalidCount(i64),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("durable store error: {0}")]
    Storage(#[from] anyhow::Error),
}

pub type TrackerResult<T> = Result<T, TrackerError>;

/// Per-request knobs of [`ViewTracker::track_view`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackOptions {
    /// `<= 0` disables deduplication, every request counts
    pub cooldown_secs: i64,
    pub filter_bots: bool,
}

impl Default for TrackOptions {
    fn default() -> Self {
        Self {
            cooldown_secs: 300,
            filter_bots: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SkipReason {
    Bot,
    Cooldown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackOutcome {
    pub count: i64,
    pub incremented: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<SkipReason>,
}

impl TrackOutcome {
    fn counted(count: i64) -> Self {
        Self {
            count,
            incremented: true,
            reason: None,
        }
    }

    fn skipped(count: i64, reason: SkipReason) -> Self {
        Self {
            count,
            incremented: false,
            reason: Some(reason),
        }
    }
}

/// Truncated SHA-256 of `ip:user_agent`, used to recognise repeat visitors
/// without keeping their address.
pub fn hash_visitor(ip: &str, user_agent: Option<&str>) -> String {
    let digest = Sha256::digest(format!("{ip}:{}", user_agent.unwrap_or("")).as_bytes());
    let mut hex = format!("{digest:x}");
    hex.truncate(VISITOR_HASH_LEN);
    hex
}

pub struct ViewTracker {
    counters: Arc<dyn FastCounterStore>,
    storage: Arc<dyn Storage>,
    cooldown: CooldownTracker,
    reconciler: Reconciler,
    /// Views hold it shared from the fast increment to the job submission;
    /// administrative writes hold it exclusively so no job straddles them.
    admin_gate: RwLock<()>,
    config: CounterConfig,
}

impl ViewTracker {
    /// Build the engine and spawn its reconciler. Must be called inside a tokio runtime.
    pub fn new(
        counters: Arc<dyn FastCounterStore>,
        storage: Arc<dyn Storage>,
        config: CounterConfig,
    ) -> Self {
        let reconciler = Reconciler::spawn(
            Arc::clone(&storage),
            config.reconcile_buffer_size,
            config.reconcile_timeout(),
        );

        Self {
            cooldown: CooldownTracker::new(Arc::clone(&counters)),
            counters,
            storage,
            reconciler,
            admin_gate: RwLock::new(()),
            config,
        }
    }

    /// Options built from the configured defaults.
    pub fn default_options(&self) -> TrackOptions {
        TrackOptions {
            cooldown_secs: self.config.default_cooldown_secs,
            filter_bots: self.config.filter_bots,
        }
    }

    /// Count a view of `target` unless it comes from a bot or from a visitor
    /// still in cooldown, and return the count to display.
    pub async fn track_view(
        &self,
        target: &CounterTarget,
        ip: &str,
        user_agent: Option<&str>,
        options: TrackOptions,
    ) -> TrackerResult<TrackOutcome> {
        let views_key = target.views_key();

        if options.filter_bots && is_bot(user_agent) {
            let count = self.displayed_count(target, &views_key, None).await?;
            debug!(counter = %target, count, "bot view ignored");
            return Ok(TrackOutcome::skipped(count, SkipReason::Bot));
        }

        let counter = self.resolve_counter(target).await;
        let visitor_hash = hash_visitor(ip, user_agent);

        if options.cooldown_secs > 0 {
            let window = Duration::from_secs(options.cooldown_secs as u64);

            if self
                .cooldown
                .check_and_mark(&visitor_hash, &target.canonical_key(), window)
                .await?
            {
                let count = self
                    .displayed_count(target, &views_key, counter.as_ref())
                    .await?;
                debug!(counter = %target, count, "view in cooldown");
                return Ok(TrackOutcome::skipped(count, SkipReason::Cooldown));
            }
        }

        let _gate = self.admin_gate.read().await;

        // The fast key may only be created from a known durable total, so a
        // cache restart resumes from it instead of 0.
        let seed = match &counter {
            Some(counter) => Some(counter.total_views),
            None => {
                if self.counters.exists(&views_key).await? {
                    // An existing live count already builds on a durable total.
                    Some(0)
                } else {
                    self.find_total(target).await
                }
            }
        };

        let Some(seed) = seed else {
            warn!(
                counter = %target,
                "durable total unknown and no live count, recording view in durable store only"
            );
            self.reconciler.submit(ReconcileJob {
                target: target.clone(),
                counter_id: None,
                count: None,
                visitor_hash,
                viewed_at: chrono::Utc::now(),
            });
            return Ok(TrackOutcome::counted(0));
        };

        if seed > 0 {
            self.counters.set_if_absent(&views_key, seed).await?;
        }
        let count = self.counters.increment(&views_key).await?;

        self.reconciler.submit(ReconcileJob {
            target: target.clone(),
            counter_id: counter.as_ref().map(|c| c.id),
            count: Some(count),
            visitor_hash,
            viewed_at: chrono::Utc::now(),
        });

        Ok(TrackOutcome::counted(count))
    }

    /// Count to display without recording a view: the fast cache value, or
    /// the durable total when the cache has none. Never creates a record.
    pub async fn current_count(&self, target: &CounterTarget) -> TrackerResult<i64> {
        self.displayed_count(target, &target.views_key(), None)
            .await
    }

    /// Zero the live count and the durable total and delete the counter's
    /// daily buckets and view log. Irreversible.
    pub async fn reset_counter(&self, target: &CounterTarget) -> TrackerResult<()> {
        let _gate = self.admin_gate.write().await;

        self.reconciler.admin(target, AdminWrite::Reset).await?;
        self.counters.set(&target.views_key(), 0, None).await?;

        info!(counter = %target, "counter reset");
        Ok(())
    }

    /// Set both stores to `count`. Either both writes land or an error is
    /// returned and the durable total is restored.
    pub async fn set_initial_count(&self, target: &CounterTarget, count: i64) -> TrackerResult<i64> {
        if !(0..=MAX_INITIAL_COUNT).contains(&count) {
            return Err(TrackerError::InvalidCount(count));
        }

        let _gate = self.admin_gate.write().await;

        let previous = self
            .reconciler
            .admin(target, AdminWrite::SetTotal(count))
            .await?;

        if let Err(err) = self.counters.set(&target.views_key(), count, None).await {
            if let Err(restore_err) = self
                .reconciler
                .admin(target, AdminWrite::SetTotal(previous))
                .await
            {
                error!(
                    counter = %target,
                    error = %restore_err,
                    "failed to restore durable total after cache write failure"
                );
            }
            return Err(err.into());
        }

        info!(counter = %target, count, "counter set");
        Ok(count)
    }

    /// Raise the durable total to the live count. Never lowers it. Returns
    /// the durable total afterwards, or `None` when the fast cache has no
    /// entry for the target.
    pub async fn sync_counter(&self, target: &CounterTarget) -> TrackerResult<Option<i64>> {
        self.reconciler.flush().await;

        let Some(count) = self.counters.get(&target.views_key()).await? else {
            return Ok(None);
        };

        let counter = self.storage.get_or_create_counter(target).await?;
        self.storage.raise_total_views(counter.id, count).await?;

        let total = count.max(counter.total_views);
        if total > count {
            warn!(
                counter = %target,
                live = count,
                durable = total,
                "live count is behind durable total"
            );
        }
        Ok(Some(total))
    }

    /// Total, today and the last seven days, read from the durable store.
    pub async fn get_stats(&self, target: &CounterTarget) -> TrackerResult<CounterStats> {
        Ok(stats::get_stats(self.storage.as_ref(), target).await?)
    }

    /// Every counter of `username` with its views today.
    pub async fn list_counters(&self, username: &str) -> TrackerResult<Vec<CounterSummary>> {
        let today = chrono::Utc::now().date_naive();
        let counters = self.storage.list_counters(username).await?;

        let mut summaries = Vec::with_capacity(counters.len());
        for counter in counters {
            let today_views = self
                .storage
                .daily_views(counter.id, today, today)
                .await?
                .iter()
                .map(|bucket| bucket.views)
                .sum();
            summaries.push(CounterSummary {
                counter,
                today: today_views,
            });
        }

        Ok(summaries)
    }

    /// Most recent view log rows of `target`, newest first.
    pub async fn recent_views(
        &self,
        target: &CounterTarget,
        limit: i64,
    ) -> TrackerResult<Vec<ViewLogEntry>> {
        match self.storage.find_counter(target).await? {
            Some(counter) => Ok(self.storage.view_logs(counter.id, limit).await?),
            None => Ok(Vec::new()),
        }
    }

    /// Time left before the visitor `ip`/`user_agent` is counted again on `target`.
    pub async fn cooldown_remaining(
        &self,
        target: &CounterTarget,
        ip: &str,
        user_agent: Option<&str>,
    ) -> TrackerResult<Option<Duration>> {
        let visitor_hash = hash_visitor(ip, user_agent);
        Ok(self
            .cooldown
            .remaining(&visitor_hash, &target.canonical_key())
            .await?)
    }

    /// Wait until all counted views so far have reached the durable store.
    pub async fn flush(&self) {
        self.reconciler.flush().await;
    }

    /// Drain pending reconciliation and stop the background task.
    pub async fn shutdown(&self) {
        self.reconciler.shutdown().await;
    }

    pub fn counters(&self) -> &Arc<dyn FastCounterStore> {
        &self.counters
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Fetch or create the durable record within the hot-path timeout.
    /// Failures are logged and yield `None`; the view is still served.
    async fn resolve_counter(&self, target: &CounterTarget) -> Option<CounterRecord> {
        let timeout = self.config.store_timeout();
        match tokio::time::timeout(timeout, self.storage.get_or_create_counter(target)).await {
            Ok(Ok(counter)) => Some(counter),
            Ok(Err(err)) => {
                warn!(counter = %target, error = %err, "durable store lookup failed");
                None
            }
            Err(_) => {
                warn!(
                    counter = %target,
                    timeout_ms = timeout.as_millis() as u64,
                    "durable store lookup timed out"
                );
                None
            }
        }
    }

    /// Durable total within the hot-path timeout. A missing record is a
    /// known total of 0; `None` means the store could not answer.
    async fn find_total(&self, target: &CounterTarget) -> Option<i64> {
        let timeout = self.config.store_timeout();
        match tokio::time::timeout(timeout, self.storage.find_counter(target)).await {
            Ok(Ok(counter)) => Some(counter.map_or(0, |c| c.total_views)),
            Ok(Err(err)) => {
                warn!(counter = %target, error = %err, "durable store lookup failed");
                None
            }
            Err(_) => {
                warn!(
                    counter = %target,
                    timeout_ms = timeout.as_millis() as u64,
                    "durable store lookup timed out"
                );
                None
            }
        }
    }

    async fn displayed_count(
        &self,
        target: &CounterTarget,
        views_key: &str,
        known: Option<&CounterRecord>,
    ) -> TrackerResult<i64> {
        if let Some(count) = self.counters.get(views_key).await? {
            return Ok(count);
        }

        if let Some(counter) = known {
            return Ok(counter.total_views);
        }

        Ok(self.find_total(target).await.unwrap_or(0))
    }
}
