use crate::cache::{CacheError, CacheResult, FastCounterStore};
use anyhow::Result;
use async_trait::async_trait;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::{AsyncCommands, Client, RedisError};
use std::time::Duration;

/// Redis-backed counter store. `INCR` provides the atomic increment and
/// `SET EX` the expiring keys.
pub struct RedisCounterStore {
    connection: ConnectionManager,
}

impl RedisCounterStore {
    /// Connect eagerly so an unreachable server is reported at startup.
    pub async fn connect(
        redis_url: &str,
        connect_timeout: Duration,
        response_timeout: Duration,
    ) -> Result<Self> {
        let config = ConnectionManagerConfig::new()
            .set_number_of_retries(1)
            .set_connection_timeout(connect_timeout)
            .set_response_timeout(response_timeout);

        let client = Client::open(redis_url)?;
        let connection = client.get_connection_manager_with_config(config).await?;

        Ok(Self { connection })
    }
}

fn map_err(key: &str, err: RedisError) -> CacheError {
    if err.is_io_error()
        || err.is_timeout()
        || err.is_connection_dropped()
        || err.is_connection_refusal()
    {
        CacheError::Unavailable(err.to_string())
    } else if err.kind() == redis::ErrorKind::TypeError {
        CacheError::InvalidValue {
            key: key.to_string(),
        }
    } else {
        CacheError::Backend(err.to_string())
    }
}

#[async_trait]
impl FastCounterStore for RedisCounterStore {
    async fn get(&self, key: &str) -> CacheResult<Option<i64>> {
        let mut conn = self.connection.clone();
        conn.get(key).await.map_err(|e| map_err(key, e))
    }

    async fn set(&self, key: &str, value: i64, ttl: Option<Duration>) -> CacheResult<()> {
        let mut conn = self.connection.clone();
        match ttl {
            Some(ttl) => conn
                .set_ex(key, value, ttl.as_secs().max(1))
                .await
                .map_err(|e| map_err(key, e)),
            None => conn.set(key, value).await.map_err(|e| map_err(key, e)),
        }
    }

    async fn set_if_absent(&self, key: &str, value: i64) -> CacheResult<bool> {
        let mut conn = self.connection.clone();
        conn.set_nx(key, value).await.map_err(|e| map_err(key, e))
    }

    async fn increment(&self, key: &str) -> CacheResult<i64> {
        let mut conn = self.connection.clone();
        conn.incr(key, 1i64).await.map_err(|e| map_err(key, e))
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.connection.clone();
        conn.exists(key).await.map_err(|e| map_err(key, e))
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        let mut conn = self.connection.clone();
        conn.del(key).await.map_err(|e| map_err(key, e))
    }

    async fn ttl(&self, key: &str) -> CacheResult<Option<Duration>> {
        let mut conn = self.connection.clone();
        // -2: missing key, -1: no expiry
        let secs: i64 = conn.ttl(key).await.map_err(|e| map_err(key, e))?;
        Ok((secs >= 0).then(|| Duration::from_secs(secs as u64)))
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_to_closed_port_fails_fast() {
        let result = RedisCounterStore::connect(
            "redis://127.0.0.1:1/",
            Duration::from_millis(100),
            Duration::from_millis(100),
        )
        .await;
        assert!(result.is_err());
    }

    #[test]
    fn test_connection_errors_are_unavailable() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert!(map_err("views:a", RedisError::from(io)).is_unavailable());
    }

    #[test]
    fn test_type_errors_name_the_key() {
        let err = RedisError::from((redis::ErrorKind::TypeError, "not an integer"));
        match map_err("views:a", err) {
            CacheError::InvalidValue { key } => assert_eq!(key, "views:a"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
