//! Read-only rollups of the durable store.
//!
//! Stats never consult the fast cache: daily history only lives in the
//! durable store, and `total` is reported as the store last recorded it.

use anyhow::Result;
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::models::{CounterTarget, DailyBucket};
use crate::storage::{format_date, Storage};

/// Number of days in the weekly series.
pub const WEEK_DAYS: usize = 7;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterStats {
    pub total: i64,
    pub today: i64,
    /// One entry per day, oldest first, the last entry being today.
    pub weekly: [i64; WEEK_DAYS],
}

impl CounterStats {
    pub fn empty() -> Self {
        Self {
            total: 0,
            today: 0,
            weekly: [0; WEEK_DAYS],
        }
    }
}

/// Spread `buckets` over the seven days ending at `today`.
///
/// Days without a bucket are 0; buckets outside the window are ignored.
pub fn weekly_series(buckets: &[DailyBucket], today: NaiveDate) -> [i64; WEEK_DAYS] {
    let mut weekly = [0; WEEK_DAYS];
    for (slot, days_ago) in weekly.iter_mut().zip((0..WEEK_DAYS as i64).rev()) {
        let day = format_date(today - Duration::days(days_ago));
        *slot = buckets
            .iter()
            .filter(|b| b.date == day)
            .map(|b| b.views)
            .sum();
    }
    weekly
}

/// Stats for `target` as of `today` (UTC day).
pub async fn stats_on(
    storage: &dyn Storage,
    target: &CounterTarget,
    today: NaiveDate,
) -> Result<CounterStats> {
    let Some(counter) = storage.find_counter(target).await? else {
        return Ok(CounterStats::empty());
    };

    let from = today - Duration::days(WEEK_DAYS as i64 - 1);
    let buckets = storage.daily_views(counter.id, from, today).await?;
    let weekly = weekly_series(&buckets, today);

    Ok(CounterStats {
        total: counter.total_views,
        today: weekly[WEEK_DAYS - 1],
        weekly,
    })
}

/// Stats for `target` as of the current UTC day.
pub async fn get_stats(storage: &dyn Storage, target: &CounterTarget) -> Result<CounterStats> {
    stats_on(storage, target, chrono::Utc::now().date_naive()).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bucket(date: &str, views: i64) -> DailyBucket {
        DailyBucket {
            counter_id: 1,
            date: date.to_string(),
            views,
        }
    }

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_sparse_buckets_fill_fixed_width() {
        let buckets = [bucket("2024-03-02", 4), bucket("2024-03-05", 9)];
        let weekly = weekly_series(&buckets, day("2024-03-07"));

        assert_eq!(weekly.len(), 7);
        assert_eq!(weekly, [0, 4, 0, 0, 9, 0, 0]);
    }

    #[test]
    fn test_window_ends_today_and_spans_month_boundary() {
        let buckets = [
            bucket("2024-02-25", 100),
            bucket("2024-02-26", 1),
            bucket("2024-03-03", 3),
        ];
        let weekly = weekly_series(&buckets, day("2024-03-03"));

        assert_eq!(weekly, [1, 0, 0, 0, 0, 0, 3]);
    }

    #[test]
    fn test_no_buckets_is_all_zero() {
        assert_eq!(weekly_series(&[], day("2024-01-01")), [0; 7]);
    }
}
