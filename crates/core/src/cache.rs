//! TTL key/value cache shared by every in-flight request.
//!
//! The backend stores JSON values so one instance can hold embeddings, lookup
//! results and final responses side by side, and so an external store can be
//! dropped in behind the same trait. [`Cache`] adds a namespace, a TTL and a
//! concrete value type on top of a shared backend.
//!
//! Writes are whole-value replacements under a short lock that is never held
//! across an await point: concurrent misses on one key may each compute, the
//! last write wins, and a reader never observes a partial entry.

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::time::Instant;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("cache backend failure: {0}")]
    Backend(String),
    #[error("cache entry `{key}` could not be encoded: {message}")]
    Encode { key: String, message: String },
    #[error("cache entry `{key}` is corrupt: {message}")]
    Corrupt { key: String, message: String },
}

#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError>;
    async fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<(), CacheError>;
    async fn remove(&self, key: &str) -> Result<(), CacheError>;
    async fn len(&self) -> Result<usize, CacheError>;
}

#[derive(Clone, Debug)]
struct CacheEntry {
    value: Value,
    inserted_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.inserted_at) > self.ttl
    }
}

/// Process-local backend. Expired entries are treated as absent on read and
/// removed lazily; when full, expired entries are purged first and then the
/// oldest insertion is evicted.
pub struct InMemoryCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    max_entries: usize,
}

impl InMemoryCache {
    pub fn new(max_entries: usize) -> Self {
        Self { entries: RwLock::new(HashMap::new()), max_entries: max_entries.max(1) }
    }

    pub fn purge_expired(&self) -> Result<usize, CacheError> {
        let now = Instant::now();
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        Ok(before - entries.len())
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new(10_000)
    }
}

fn poisoned() -> CacheError {
    CacheError::Backend("cache lock poisoned".to_string())
}

#[async_trait]
impl CacheBackend for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let now = Instant::now();
        {
            let entries = self.entries.read().map_err(|_| poisoned())?;
            match entries.get(key) {
                None => return Ok(None),
                Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.value.clone())),
                Some(_) => {}
            }
        }

        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        // Another writer may have refreshed the key between the two locks.
        match entries.get(key) {
            Some(entry) if !entry.is_expired(now) => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<(), CacheError> {
        let now = Instant::now();
        let mut entries = self.entries.write().map_err(|_| poisoned())?;

        if !entries.contains_key(key) && entries.len() >= self.max_entries {
            entries.retain(|_, entry| !entry.is_expired(now));
            if entries.len() >= self.max_entries {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.inserted_at)
                    .map(|(oldest_key, _)| oldest_key.clone());
                if let Some(oldest) = oldest {
                    entries.remove(&oldest);
                }
            }
        }

        entries.insert(key.to_string(), CacheEntry { value, inserted_at: now, ttl });
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.entries.write().map_err(|_| poisoned())?.remove(key);
        Ok(())
    }

    async fn len(&self) -> Result<usize, CacheError> {
        Ok(self.entries.read().map_err(|_| poisoned())?.len())
    }
}

/// Value returned by [`Cache::get_or_compute`] with whether it came from the cache.
#[derive(Clone, Debug, PartialEq)]
pub struct Cached<T> {
    pub value: T,
    pub hit: bool,
}

/// A typed, namespaced view over a shared [`CacheBackend`].
pub struct Cache<T> {
    backend: Arc<dyn CacheBackend>,
    namespace: &'static str,
    ttl: Duration,
    marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Cache<T> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            namespace: self.namespace,
            ttl: self.ttl,
            marker: PhantomData,
        }
    }
}

impl<T> Cache<T>
where
    T: Serialize + DeserializeOwned + Send,
{
    pub fn new(backend: Arc<dyn CacheBackend>, namespace: &'static str, ttl: Duration) -> Self {
        Self { backend, namespace, ttl, marker: PhantomData }
    }

    pub fn namespace(&self) -> &'static str {
        self.namespace
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn scoped_key(&self, key: &str) -> String {
        format!("{}:{key}", self.namespace)
    }

    /// A value that no longer decodes is removed before the error is returned,
    /// so only the request that observed it is affected.
    pub async fn get(&self, key: &str) -> Result<Option<T>, CacheError> {
        let scoped = self.scoped_key(key);
        let Some(raw) = self.backend.get(&scoped).await? else {
            return Ok(None);
        };

        match serde_json::from_value(raw) {
            Ok(value) => Ok(Some(value)),
            Err(error) => {
                self.backend.remove(&scoped).await?;
                Err(CacheError::Corrupt { key: scoped, message: error.to_string() })
            }
        }
    }

    pub async fn set(&self, key: &str, value: &T) -> Result<(), CacheError> {
        let scoped = self.scoped_key(key);
        let encoded = serde_json::to_value(value)
            .map_err(|error| CacheError::Encode { key: scoped.clone(), message: error.to_string() })?;
        self.backend.set(&scoped, encoded, self.ttl).await
    }

    /// Returns the cached value, or runs `compute` and stores its result.
    ///
    /// Failed computations are not cached. The write happens only after
    /// `compute` resolves, so a caller dropped mid-compute leaves no entry.
    pub async fn get_or_compute<F, Fut, E>(&self, key: &str, compute: F) -> Result<Cached<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<CacheError>,
    {
        if let Some(value) = self.get(key).await? {
            return Ok(Cached { value, hit: true });
        }

        let value = compute().await?;
        self.set(key, &value).await?;
        Ok(Cached { value, hit: false })
    }
}
