//! Process-scoped handles with an explicit connect/shutdown lifecycle.

use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};

use crate::cache::{FailoverCounterStore, FastCounterStore, MemoryCounterStore, RedisCounterStore};
use crate::config::{CacheConfig, Config, DatabaseBackend};
use crate::storage::{PostgresStorage, SqliteStorage, Storage};
use crate::tracker::ViewTracker;

pub struct AppContext {
    pub config: Config,
    pub tracker: ViewTracker,
}

impl AppContext {
    /// Connect both stores and start the engine.
    ///
    /// A durable store failure is fatal; an unreachable Redis is not, the
    /// in-process store takes over.
    pub async fn connect(config: Config) -> Result<Self> {
        let storage = connect_storage(&config).await?;

        info!("Initializing database...");
        storage.init().await?;
        info!("Database initialized successfully");

        let counters = connect_counters(&config.cache).await;
        info!(backend = counters.backend_name(), "Counter store ready");

        let tracker = ViewTracker::new(counters, storage, config.counter.clone());
        Ok(Self { config, tracker })
    }

    /// Drain pending reconciliation, then close the database pool.
    pub async fn shutdown(self) {
        info!("Shutting down, flushing pending views...");
        self.tracker.shutdown().await;
        self.tracker.storage().close().await;
        info!("Shutdown complete");
    }
}

pub async fn connect_storage(config: &Config) -> Result<Arc<dyn Storage>> {
    let db = &config.database;
    let storage: Arc<dyn Storage> = match db.backend {
        DatabaseBackend::Sqlite => {
            info!("Using SQLite storage: {}", db.url);
            Arc::new(SqliteStorage::new(&db.url, db.max_connections).await?)
        }
        DatabaseBackend::Postgres => {
            info!("Using PostgreSQL storage");
            Arc::new(PostgresStorage::new(&db.url, db.max_connections).await?)
        }
    };
    Ok(storage)
}

pub async fn connect_counters(config: &CacheConfig) -> Arc<dyn FastCounterStore> {
    let Some(url) = config.redis_url.as_deref() else {
        info!("REDIS_URL not set, using in-memory counter store");
        return Arc::new(MemoryCounterStore::new());
    };

    match RedisCounterStore::connect(url, config.connect_timeout(), config.response_timeout())
        .await
    {
        Ok(redis) => Arc::new(FailoverCounterStore::new(Arc::new(redis))),
        Err(err) => {
            warn!(error = %err, "Could not connect to Redis, using in-memory counter store");
            Arc::new(MemoryCounterStore::new())
        }
    }
}
