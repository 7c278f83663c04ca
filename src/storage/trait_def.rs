use crate::models::{CounterRecord, CounterTarget, DailyBucket, ViewLogEntry};
use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;

/// Format used for the `date` column of daily buckets.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Durable aggregate store: running totals, daily buckets and the view log.
///
/// Counters are addressed by the target's canonical key, which is unique.
/// Daily buckets are unique per `(counter_id, date)`.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Initialize the storage (create tables and indexes)
    async fn init(&self) -> Result<()>;

    /// Fetch the counter for `target`, creating it with zero views if missing
    async fn get_or_create_counter(&self, target: &CounterTarget) -> Result<CounterRecord>;

    /// Fetch the counter for `target` without creating it
    async fn find_counter(&self, target: &CounterTarget) -> Result<Option<CounterRecord>>;

    /// All counters of a user, newest first
    async fn list_counters(&self, username: &str) -> Result<Vec<CounterRecord>>;

    /// Overwrite the running total. Returns false if the counter does not exist.
    async fn set_total_views(&self, counter_id: i64, total_views: i64) -> Result<bool>;

    /// Raise the running total to `total_views` unless it is already higher.
    ///
    /// Reconciliation uses this so that out-of-order writes never move the
    /// durable total backwards.
    async fn raise_total_views(&self, counter_id: i64, total_views: i64) -> Result<()>;

    /// Add one to the running total
    async fn increment_total_views(&self, counter_id: i64) -> Result<()>;

    /// Add one view to the bucket of `date`, creating the bucket if needed
    async fn increment_daily_views(&self, counter_id: i64, date: NaiveDate) -> Result<()>;

    /// Buckets between `from` and `to` inclusive, oldest first
    async fn daily_views(
        &self,
        counter_id: i64,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DailyBucket>>;

    /// Append an audit row for a counted view
    async fn append_view_log(
        &self,
        counter_id: i64,
        visitor_hash: &str,
        viewed_at: i64,
    ) -> Result<()>;

    /// Most recent audit rows, newest first
    async fn view_logs(&self, counter_id: i64, limit: i64) -> Result<Vec<ViewLogEntry>>;

    /// Delete every daily bucket and view log row of a counter
    async fn clear_history(&self, counter_id: i64) -> Result<()>;

    /// Close the connection pool
    async fn close(&self);
}
