//! Cache store backends
//!
//! A store is a plain key-value map with per-entry TTL. It knows nothing
//! about chat requests; [`super::ResponseCache`] owns keying and encoding.
//!
//! - [`MemoryStore`]: bounded LRU map private to this process
//! - [`RedisStore`]: shared across gateway replicas, survives restarts
//! - [`NullStore`]: holds nothing, backs a disabled cache

use super::CacheKey;
use async_trait::async_trait;
use lru::LruCache;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, RedisResult};
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Cache store failure
///
/// Never crosses the [`super::ResponseCache`] boundary.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache store unavailable: {0}")]
    Unavailable(String),

    #[error("cached entry could not be decoded: {0}")]
    Corrupt(String),

    #[error("response could not be encoded for caching: {0}")]
    Encode(String),
}

/// Key-value store with TTL semantics
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Stored bytes for `key`, or `None` if absent or expired
    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, CacheError>;

    /// Store `value` under `key`, replacing any previous entry
    async fn set(&self, key: &CacheKey, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError>;

    /// Short backend name for logs
    fn name(&self) -> &'static str;
}

struct CacheEntry {
    data: Vec<u8>,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// In-process store with TTL expiry and least-recently-used eviction
///
/// Reads promote the entry; a write at capacity drops the least recently
/// used entry in constant time. Expired entries are removed when read.
pub struct MemoryStore {
    entries: Mutex<LruCache<CacheKey, CacheEntry>>,
}

impl MemoryStore {
    pub fn new(max_entries: usize) -> Self {
        let capacity = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Number of live (unexpired) entries
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.lock()
            .map(|entries| entries.iter().filter(|(_, e)| !e.is_expired(now)).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<MutexGuard<'_, LruCache<CacheKey, CacheEntry>>, CacheError> {
        self.entries
            .lock()
            .map_err(|_| CacheError::Unavailable("memory cache lock poisoned".to_string()))
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, CacheError> {
        let now = Instant::now();
        let mut entries = self.lock()?;

        let expired = match entries.get(key) {
            Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.data.clone())),
            Some(_) => true,
            None => false,
        };

        if expired {
            entries.pop(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &CacheKey, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        let expires_at = Instant::now()
            .checked_add(ttl)
            .ok_or_else(|| CacheError::Unavailable(format!("ttl {:?} overflows the clock", ttl)))?;

        self.lock()?.put(
            key.clone(),
            CacheEntry {
                data: value,
                expires_at,
            },
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Default bound on connecting to and each command against Redis
pub const DEFAULT_REDIS_TIMEOUT: Duration = Duration::from_secs(2);

/// Shared store backed by a Redis server (`GET` / `SET .. EX`)
///
/// The connection is opened on first use and reopened after any failed
/// command, so an unreachable server only turns lookups into errors.
pub struct RedisStore {
    client: redis::Client,
    conn: tokio::sync::Mutex<Option<MultiplexedConnection>>,
    timeout: Duration,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("addr", &self.client.get_connection_info().addr)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Parse `url` without connecting
    pub fn open(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)
            .map_err(|e| CacheError::Unavailable(format!("invalid redis url: {}", e)))?;
        Ok(Self {
            client,
            conn: tokio::sync::Mutex::new(None),
            timeout: DEFAULT_REDIS_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn connection(&self) -> Result<MultiplexedConnection, CacheError> {
        let mut slot = self.conn.lock().await;
        if let Some(conn) = slot.as_ref() {
            return Ok(conn.clone());
        }

        let conn = self
            .bounded(self.client.get_multiplexed_async_connection())
            .await?;
        tracing::debug!(addr = ?self.client.get_connection_info().addr, "Connected to redis cache");
        *slot = Some(conn.clone());
        Ok(conn)
    }

    async fn reset(&self) {
        *self.conn.lock().await = None;
    }

    async fn bounded<T>(
        &self,
        op: impl Future<Output = RedisResult<T>>,
    ) -> Result<T, CacheError> {
        match tokio::time::timeout(self.timeout, op).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(CacheError::Unavailable(e.to_string())),
            Err(_) => Err(CacheError::Unavailable(format!(
                "redis did not answer within {:?}",
                self.timeout
            ))),
        }
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, CacheError> {
        let mut conn = self.connection().await?;
        let result = self
            .bounded(conn.get::<_, Option<Vec<u8>>>(key.as_str()))
            .await;
        if result.is_err() {
            self.reset().await;
        }
        result
    }

    async fn set(&self, key: &CacheKey, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        // EX takes whole seconds and rejects 0
        let seconds = ttl.as_secs().max(1);
        let mut conn = self.connection().await?;
        let result = self
            .bounded(conn.set_ex::<_, _, ()>(key.as_str(), value, seconds))
            .await;
        if result.is_err() {
            self.reset().await;
        }
        result
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

/// Store that never holds anything; used when caching is disabled
#[derive(Debug, Default)]
pub struct NullStore;

#[async_trait]
impl CacheStore for NullStore {
    async fn get(&self, _key: &CacheKey) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(None)
    }

    async fn set(&self, _key: &CacheKey, _value: Vec<u8>, _ttl: Duration) -> Result<(), CacheError> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "null"
    }
}
