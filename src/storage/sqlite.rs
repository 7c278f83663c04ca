use crate::models::{CounterRecord, CounterTarget, DailyBucket, ViewLogEntry};
use crate::storage::{format_date, Storage};
use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::sync::Arc;

const COUNTER_COLUMNS: &str =
    "id, canonical_key, username, repo, page_id, total_views, created_at, updated_at";

pub struct SqliteStorage {
    pool: Arc<SqlitePool>,
}

impl SqliteStorage {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS counters (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                canonical_key TEXT NOT NULL UNIQUE,
                username TEXT NOT NULL,
                repo TEXT,
                page_id TEXT,
                total_views INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_counters_username ON counters(username)")
            .execute(self.pool.as_ref())
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS daily_views (
                counter_id INTEGER NOT NULL REFERENCES counters(id),
                date TEXT NOT NULL,
                views INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (counter_id, date)
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS view_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                counter_id INTEGER NOT NULL REFERENCES counters(id),
                visitor_hash TEXT NOT NULL,
                viewed_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_view_logs_counter ON view_logs(counter_id, visitor_hash)",
        )
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn get_or_create_counter(&self, target: &CounterTarget) -> Result<CounterRecord> {
        let created_at = now();
        let canonical_key = target.canonical_key();

        sqlx::query(
            r#"
            INSERT INTO counters (canonical_key, username, repo, page_id, total_views, created_at, updated_at)
            VALUES (?, ?, ?, ?, 0, ?, ?)
            ON CONFLICT(canonical_key) DO NOTHING
            "#,
        )
        .bind(&canonical_key)
        .bind(target.username())
        .bind(target.repo())
        .bind(target.page_id())
        .bind(created_at)
        .bind(created_at)
        .execute(self.pool.as_ref())
        .await?;

        let counter = sqlx::query_as::<_, CounterRecord>(&format!(
            "SELECT {COUNTER_COLUMNS} FROM counters WHERE canonical_key = ?"
        ))
        .bind(&canonical_key)
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(counter)
    }

    async fn find_counter(&self, target: &CounterTarget) -> Result<Option<CounterRecord>> {
        let counter = sqlx::query_as::<_, CounterRecord>(&format!(
            "SELECT {COUNTER_COLUMNS} FROM counters WHERE canonical_key = ?"
        ))
        .bind(target.canonical_key())
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(counter)
    }

    async fn list_counters(&self, username: &str) -> Result<Vec<CounterRecord>> {
        let counters = sqlx::query_as::<_, CounterRecord>(&format!(
            "SELECT {COUNTER_COLUMNS} FROM counters WHERE username = ? ORDER BY created_at DESC, id DESC"
        ))
        .bind(username)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(counters)
    }

    async fn set_total_views(&self, counter_id: i64, total_views: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE counters
            SET total_views = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(total_views)
        .bind(now())
        .bind(counter_id)
        .execute(self.pool.as_ref())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn raise_total_views(&self, counter_id: i64, total_views: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE counters
            SET total_views = MAX(total_views, ?), updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(total_views)
        .bind(now())
        .bind(counter_id)
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn increment_total_views(&self, counter_id: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE counters
            SET total_views = total_views + 1, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(now())
        .bind(counter_id)
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn increment_daily_views(&self, counter_id: i64, date: NaiveDate) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO daily_views (counter_id, date, views)
            VALUES (?, ?, 1)
            ON CONFLICT (counter_id, date) DO UPDATE SET
                views = daily_views.views + 1
            "#,
        )
        .bind(counter_id)
        .bind(format_date(date))
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn daily_views(
        &self,
        counter_id: i64,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DailyBucket>> {
        let buckets = sqlx::query_as::<_, DailyBucket>(
            r#"
            SELECT counter_id, date, views
            FROM daily_views
            WHERE counter_id = ? AND date >= ? AND date <= ?
            ORDER BY date ASC
            "#,
        )
        .bind(counter_id)
        .bind(format_date(from))
        .bind(format_date(to))
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(buckets)
    }

    async fn append_view_log(
        &self,
        counter_id: i64,
        visitor_hash: &str,
        viewed_at: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO view_logs (counter_id, visitor_hash, viewed_at)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(counter_id)
        .bind(visitor_hash)
        .bind(viewed_at)
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn view_logs(&self, counter_id: i64, limit: i64) -> Result<Vec<ViewLogEntry>> {
        let logs = sqlx::query_as::<_, ViewLogEntry>(
            r#"
            SELECT id, counter_id, visitor_hash, viewed_at
            FROM view_logs
            WHERE counter_id = ?
            ORDER BY viewed_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(counter_id)
        .bind(limit)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(logs)
    }

    async fn clear_history(&self, counter_id: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM daily_views WHERE counter_id = ?")
            .bind(counter_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM view_logs WHERE counter_id = ?")
            .bind(counter_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
