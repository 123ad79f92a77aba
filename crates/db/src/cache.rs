//! Redis-backed [`CacheBackend`] so several server processes share one cache.
//!
//! Values are stored as JSON strings under `<prefix>:<namespace>:<key>` with a
//! millisecond TTL set atomically by `PSETEX`, so a reader never sees an entry
//! without its expiry. The connection is opened on first use and reconnects on
//! its own after a drop.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::AsyncCommands;
use serde_json::Value;
use tokio::sync::OnceCell;

use concierge_core::cache::{CacheBackend, CacheError};

pub const DEFAULT_KEY_PREFIX: &str = "concierge";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

pub struct RedisCache {
    client: redis::Client,
    connection: OnceCell<ConnectionManager>,
    prefix: String,
}

impl RedisCache {
    /// Parses `url` without connecting.
    pub fn open(url: &str) -> Result<Self, CacheError> {
        Self::with_prefix(url, DEFAULT_KEY_PREFIX)
    }

    pub fn with_prefix(url: &str, prefix: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url).map_err(backend_error)?;
        Ok(Self { client, connection: OnceCell::new(), prefix: prefix.to_string() })
    }

    fn key(&self, key: &str) -> String {
        format!("{}:{key}", self.prefix)
    }

    async fn connection(&self) -> Result<ConnectionManager, CacheError> {
        let manager = self
            .connection
            .get_or_try_init(|| async {
                let config = ConnectionManagerConfig::new()
                    .set_number_of_retries(1)
                    .set_connection_timeout(CONNECT_TIMEOUT)
                    .set_response_timeout(CONNECT_TIMEOUT);
                ConnectionManager::new_with_config(self.client.clone(), config)
                    .await
                    .map_err(backend_error)
            })
            .await?;
        Ok(manager.clone())
    }
}

fn backend_error(error: redis::RedisError) -> CacheError {
    CacheError::Backend(format!("redis: {error}"))
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl CacheBackend for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let mut connection = self.connection().await?;
        let raw: Option<String> = connection.get(self.key(key)).await.map_err(backend_error)?;

        raw.map(|text| {
            serde_json::from_str(&text).map_err(|error| CacheError::Corrupt {
                key: key.to_string(),
                message: error.to_string(),
            })
        })
        .transpose()
    }

    async fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<(), CacheError> {
        let payload = serde_json::to_string(&value).map_err(|error| CacheError::Encode {
            key: key.to_string(),
            message: error.to_string(),
        })?;
        let mut connection = self.connection().await?;
        let _: () = connection
            .pset_ex(self.key(key), payload, ttl_millis(ttl))
            .await
            .map_err(backend_error)?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        let mut connection = self.connection().await?;
        let _: () = connection.del(self.key(key)).await.map_err(backend_error)?;
        Ok(())
    }

    /// Counts keys under this prefix with `KEYS`; meant for health checks only.
    async fn len(&self) -> Result<usize, CacheError> {
        let mut connection = self.connection().await?;
        let keys: Vec<String> = redis::cmd("KEYS")
            .arg(format!("{}:*", self.prefix))
            .query_async(&mut connection)
            .await
            .map_err(backend_error)?;
        Ok(keys.len())
    }
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::time::Duration;

    use serde_json::json;

    use concierge_core::cache::{CacheBackend, CacheError};

    use super::{ttl_millis, RedisCache};

    #[test]
    fn non_redis_url_is_rejected_without_connecting() {
        assert!(matches!(RedisCache::open("http://localhost:6379"), Err(CacheError::Backend(_))));
    }

    #[test]
    fn keys_carry_the_configured_prefix() {
        let cache = RedisCache::with_prefix("redis://127.0.0.1:6379", "tenant-a").expect("open");
        assert_eq!(cache.key("response:abc"), "tenant-a:response:abc");
    }

    #[test]
    fn sub_millisecond_ttl_still_expires() {
        assert_eq!(ttl_millis(Duration::from_micros(10)), 1);
        assert_eq!(ttl_millis(Duration::from_secs(300)), 300_000);
    }

    #[tokio::test]
    async fn unreachable_server_surfaces_as_backend_error() {
        let cache = RedisCache::open("redis://127.0.0.1:1/").expect("url parses");

        assert!(matches!(cache.get("k").await, Err(CacheError::Backend(_))));
        assert!(matches!(
            cache.set("k", json!(1), Duration::from_secs(5)).await,
            Err(CacheError::Backend(_))
        ));
    }

    /// Runs against a live server only when `CONCIERGE_TEST_REDIS_URL` is set.
    #[tokio::test]
    async fn round_trips_against_a_live_server() {
        let Ok(url) = env::var("CONCIERGE_TEST_REDIS_URL") else {
            return;
        };
        let prefix = format!("concierge-test-{}", std::process::id());
        let cache = RedisCache::with_prefix(&url, &prefix).expect("open");

        cache.set("templates:k", json!({"ids": ["T-1"]}), Duration::from_secs(30)).await.expect("set");
        assert_eq!(cache.get("templates:k").await.expect("get"), Some(json!({"ids": ["T-1"]})));
        assert_eq!(cache.len().await.expect("len"), 1);

        cache.remove("templates:k").await.expect("remove");
        assert_eq!(cache.get("templates:k").await.expect("get"), None);

        cache.set("short", json!(true), Duration::from_millis(50)).await.expect("set");
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(cache.get("short").await.expect("get"), None);
    }
}
