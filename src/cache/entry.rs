//! Cache entries with per-class expiration

use crate::cache::types::{CacheKey, CacheValue, TtlClass};
use crate::config::instant_after;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::time::Instant;

/// An immutable cache entry
///
/// Refreshing a key replaces the entry instead of mutating it. Expiry
/// uses the tokio clock so it follows paused time in tests.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// The cache key
    pub key: CacheKey,

    /// The serialized response payload
    pub value: CacheValue,

    /// Recency classification the TTL was chosen from
    pub ttl_class: TtlClass,

    /// When the entry was written
    pub created_at: Instant,

    /// When the entry stops being served
    pub expires_at: Instant,

    /// Wall-clock write time, for reporting
    pub written_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Create a new cache entry that lives for `ttl`
    pub fn new(key: CacheKey, value: CacheValue, ttl_class: TtlClass, ttl: Duration) -> Self {
        let now = Instant::now();

        Self {
            key,
            value,
            ttl_class,
            created_at: now,
            expires_at: instant_after(now, ttl),
            written_at: Utc::now(),
        }
    }

    /// Check if the entry has expired
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    /// Get time until expiration
    pub fn time_until_expiration(&self) -> Option<Duration> {
        let now = Instant::now();
        if now >= self.expires_at {
            None
        } else {
            Some(self.expires_at - now)
        }
    }

    /// Get the age of the entry
    pub fn age(&self) -> Duration {
        Instant::now().saturating_duration_since(self.created_at)
    }
}
