use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub counter: CounterConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub backend: DatabaseBackend,
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    Sqlite,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Redis URL. When unset the in-process store is used from the start.
    pub redis_url: Option<String>,
    pub connect_timeout_ms: u64,
    pub response_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CounterConfig {
    /// Cooldown applied when the caller does not pass one. `<= 0` disables it.
    pub default_cooldown_secs: i64,
    pub filter_bots: bool,
    /// Bound on durable store calls made on the request path
    pub store_timeout_ms: u64,
    /// Capacity of the reconciliation queue
    pub reconcile_buffer_size: usize,
    /// Bound on each reconciliation job
    pub reconcile_timeout_ms: u64,
}

impl CacheConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}

impl CounterConfig {
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn reconcile_timeout(&self) -> Duration {
        Duration::from_millis(self.reconcile_timeout_ms)
    }
}

impl Default for CounterConfig {
    fn default() -> Self {
        Self {
            default_cooldown_secs: 300,
            filter_bots: true,
            store_timeout_ms: 500,
            reconcile_buffer_size: 10_000,
            reconcile_timeout_ms: 5_000,
        }
    }
}

fn env_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("invalid value for {key}: '{raw}'")),
        Err(_) => Ok(default),
    }
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let backend_str =
            std::env::var("DATABASE_BACKEND").unwrap_or_else(|_| "sqlite".to_string());

        let backend = match backend_str.to_lowercase().as_str() {
            "postgres" | "postgresql" => DatabaseBackend::Postgres,
            "sqlite" => DatabaseBackend::Sqlite,
            other => {
                tracing::warn!(
                    "Unknown DATABASE_BACKEND '{other}', falling back to 'sqlite'. Supported values: sqlite, postgres"
                );
                DatabaseBackend::Sqlite
            }
        };

        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./viewcount.db?mode=rwc".to_string());
        let max_connections = env_or("DATABASE_MAX_CONNECTIONS", 5u32)?;

        let redis_url = std::env::var("REDIS_URL")
            .ok()
            .filter(|url| !url.trim().is_empty());

        let defaults = CounterConfig::default();

        Ok(Config {
            database: DatabaseConfig {
                backend,
                url: database_url,
                max_connections,
            },
            cache: CacheConfig {
                redis_url,
                connect_timeout_ms: env_or("REDIS_CONNECT_TIMEOUT_MS", 250)?,
                response_timeout_ms: env_or("REDIS_RESPONSE_TIMEOUT_MS", 100)?,
            },
            counter: CounterConfig {
                default_cooldown_secs: env_or(
                    "COUNTER_COOLDOWN_SECS",
                    defaults.default_cooldown_secs,
                )?,
                filter_bots: env_flag("COUNTER_FILTER_BOTS", defaults.filter_bots),
                store_timeout_ms: env_or("COUNTER_STORE_TIMEOUT_MS", defaults.store_timeout_ms)?,
                reconcile_buffer_size: env_or(
                    "RECONCILE_BUFFER_SIZE",
                    defaults.reconcile_buffer_size,
                )?,
                reconcile_timeout_ms: env_or(
                    "RECONCILE_TIMEOUT_MS",
                    defaults.reconcile_timeout_ms,
                )?,
            },
        })
    }
}
