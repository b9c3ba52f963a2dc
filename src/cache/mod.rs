//! Content-addressed response cache
//!
//! Responses are keyed by a SHA-256 fingerprint of the resolved request:
//! model (after routing), messages, temperature, max_tokens and the forced
//! `stream = false`, serialized as JSON with object keys sorted at every
//! level. Two requests share a key iff those canonical forms are
//! byte-identical.
//!
//! Caching is best-effort. Store failures and undecodable entries are logged
//! and degrade to a miss or a skipped write; they never reach the caller.
//! Concurrent identical requests that all miss each hit the backend (no
//! single-flight coordination).

mod store;

pub use store::{
    CacheError, CacheStore, DEFAULT_REDIS_TIMEOUT, MemoryStore, NullStore, RedisStore,
};

use crate::config::{CacheBackend, CacheConfig};
use crate::schema::{ChatRequest, ChatResponse};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Default lifetime of a cached response
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// Hex-encoded SHA-256 fingerprint of a resolved request
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Fingerprint a resolved request
    pub fn for_request(request: &ChatRequest) -> Self {
        let canonical = canonical_json(&request_value(request));
        let digest = Sha256::digest(canonical.as_bytes());
        Self(digest.iter().map(|b| format!("{:02x}", b)).collect())
    }

    /// Wrap an already computed fingerprint
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Every field that influences generation, including unset ones as `null`
fn request_value(request: &ChatRequest) -> Value {
    serde_json::json!({
        "model": request.model(),
        "messages": request.messages(),
        "temperature": request.temperature(),
        "max_tokens": request.max_tokens(),
        "stream": request.stream(),
    })
}

/// Compact JSON with object keys sorted recursively
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(item, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Best-effort response cache over a pluggable [`CacheStore`]
#[derive(Clone)]
pub struct ResponseCache {
    store: Arc<dyn CacheStore>,
    ttl: Duration,
    enabled: bool,
}

impl ResponseCache {
    pub fn new(store: Arc<dyn CacheStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            enabled: true,
        }
    }

    /// A cache that always misses and never stores
    pub fn disabled() -> Self {
        Self {
            store: Arc::new(NullStore),
            ttl: DEFAULT_TTL,
            enabled: false,
        }
    }

    /// Cache on the backend selected by `config`, or a disabled one
    ///
    /// # Errors
    ///
    /// Fails only when the redis URL cannot be parsed; the server itself is
    /// not contacted until the first lookup.
    pub fn from_config(config: &CacheConfig) -> Result<Self, CacheError> {
        if !config.enabled {
            return Ok(Self::disabled());
        }

        let store: Arc<dyn CacheStore> = match config.backend {
            CacheBackend::Memory => Arc::new(MemoryStore::new(config.max_entries)),
            CacheBackend::Redis => Arc::new(RedisStore::open(&config.redis_url())?),
        };
        tracing::info!(
            store = store.name(),
            ttl_seconds = config.ttl_seconds,
            "Response cache enabled"
        );
        Ok(Self::new(store, config.ttl()))
    }

    /// Backend name for logs
    pub fn store_name(&self) -> &'static str {
        self.store.name()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Look up a previously stored response for `request`
    pub async fn get(&self, request: &ChatRequest) -> Option<ChatResponse> {
        if !self.enabled {
            return None;
        }

        let key = CacheKey::for_request(request);
        match self.try_get(&key).await {
            Ok(hit) => hit,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    store = self.store.name(),
                    key = %key,
                    "Cache lookup failed, treating as miss"
                );
                None
            }
        }
    }

    /// Store `response` for `request` with the default TTL
    pub async fn set(&self, request: &ChatRequest, response: &ChatResponse) {
        self.set_with_ttl(request, response, self.ttl).await;
    }

    /// Store `response` for `request`, expiring after `ttl`
    pub async fn set_with_ttl(&self, request: &ChatRequest, response: &ChatResponse, ttl: Duration) {
        if !self.enabled {
            return;
        }

        let key = CacheKey::for_request(request);
        if let Err(e) = self.try_set(&key, response, ttl).await {
            tracing::warn!(
                error = %e,
                store = self.store.name(),
                key = %key,
                "Cache write failed, response not cached"
            );
        }
    }

    async fn try_get(&self, key: &CacheKey) -> Result<Option<ChatResponse>, CacheError> {
        let Some(bytes) = self.store.get(key).await? else {
            return Ok(None);
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| CacheError::Corrupt(e.to_string()))
    }

    async fn try_set(
        &self,
        key: &CacheKey,
        response: &ChatResponse,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let bytes = serde_json::to_vec(response).map_err(|e| CacheError::Encode(e.to_string()))?;
        self.store.set(key, bytes, ttl).await
    }
}
