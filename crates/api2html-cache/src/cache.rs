//! Cached response types and statistics

use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::time::Instant;

/// A cached backend response with its expiry
#[derive(Debug, Clone)]
pub struct CachedResponse<V> {
    /// The cached value
    pub value: V,

    /// Wall-clock time the value was stored
    pub generated_at: DateTime<Utc>,

    /// Monotonic instant after which the entry is a miss
    pub expires_at: Instant,
}

impl<V> CachedResponse<V> {
    /// Create a new entry that expires `ttl` from now
    pub fn new(value: V, ttl: Duration) -> Self {
        Self {
            value,
            generated_at: Utc::now(),
            expires_at: Instant::now() + ttl,
        }
    }

    /// Check if the entry has expired (`now >= expiry`)
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    pub fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    /// Time left before the entry expires
    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }
}

/// Statistics for a response cache
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheStats {
    /// Lookups answered from the cache
    pub hits: u64,

    /// Lookups that found nothing or an expired entry
    pub misses: u64,

    /// Entries written
    pub stores: u64,

    /// Entries currently held, expired ones included until next read
    pub entries: usize,
}

impl CacheStats {
    /// Calculate cache hit rate
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
