//! In-memory response cache with lazy expiry

use crate::cache::{CacheStats, CachedResponse};
use crate::fingerprint::Fingerprint;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::trace;

/// TTL cache mapping a [`Fingerprint`] to a previously fetched response.
///
/// Expired entries are treated as misses and removed on the read that finds
/// them. Concurrent stores under the same fingerprint are last-write-wins.
pub struct ResponseCache<V> {
    entries: RwLock<HashMap<Fingerprint, CachedResponse<V>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    stores: AtomicU64,
}

impl<V: Clone> ResponseCache<V> {
    /// Create an empty cache
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            stores: AtomicU64::new(0),
        }
    }

    /// Return the cached value if present and not expired
    pub async fn lookup(&self, key: &Fingerprint) -> Option<V> {
        let now = Instant::now();

        let expired = {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if !entry.is_expired_at(now) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    trace!(fingerprint = %key, "response cache hit");
                    return Some(entry.value.clone());
                }
                Some(_) => true,
                None => false,
            }
        };

        if expired {
            let mut entries = self.entries.write().await;
            // a concurrent store may have refreshed it in between
            if entries.get(key).is_some_and(|entry| entry.is_expired_at(now)) {
                entries.remove(key);
                trace!(fingerprint = %key, "response cache entry expired");
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Insert or overwrite an entry. A zero TTL means "do not cache".
    pub async fn store(&self, key: Fingerprint, value: V, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }

        let mut entries = self.entries.write().await;
        entries.insert(key, CachedResponse::new(value, ttl));
        self.stores.fetch_add(1, Ordering::Relaxed);
    }

    /// Drop one entry
    pub async fn invalidate(&self, key: &Fingerprint) -> bool {
        self.entries.write().await.remove(key).is_some()
    }

    /// Drop every entry and reset the counters
    pub async fn clear(&self) {
        self.entries.write().await.clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.stores.store(0, Ordering::Relaxed);
    }

    /// Number of entries held
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Get cache statistics
    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stores: self.stores.load(Ordering::Relaxed),
            entries: self.len().await,
        }
    }
}

impl<V: Clone> Default for ResponseCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> std::fmt::Debug for ResponseCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("hits", &self.hits.load(Ordering::Relaxed))
            .field("misses", &self.misses.load(Ordering::Relaxed))
            .field("stores", &self.stores.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
