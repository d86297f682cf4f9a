//! Core type definitions for the response cache

use serde::{Deserialize, Serialize};
use std::fmt;

/// Cache key type, shared with the in-flight registry
pub type CacheKey = String;

/// Cache value type - stores serialized response payloads
pub type CacheValue = String;

/// Words that mark a question as being about current data
const REALTIME_INDICATORS: &[&str] = &[
    "current",
    "latest",
    "now",
    "today",
    "present",
    "recent",
    "this quarter",
    "this year",
    "this month",
    "this week",
];

/// Data-recency classification that selects an entry's lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TtlClass {
    /// Data that changes often ("latest quarter"); short lifetime
    Realtime,

    /// Data that is settled ("2019 annual report"); long lifetime
    Historical,
}

impl TtlClass {
    /// Classify a question by looking for recency indicators
    pub fn infer(query: &str) -> Self {
        let lowered = query.to_lowercase();
        if REALTIME_INDICATORS.iter().any(|word| lowered.contains(word)) {
            TtlClass::Realtime
        } else {
            TtlClass::Historical
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TtlClass::Realtime => "realtime",
            TtlClass::Historical => "historical",
        }
    }
}

impl fmt::Display for TtlClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Statistics and metrics for cache performance monitoring
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Total number of cache hits
    pub hits: u64,

    /// Total number of cache misses (including expired entries)
    pub misses: u64,

    /// Number of entries currently in cache
    pub entries: usize,

    /// Number of entries evicted to make room for new ones
    pub evictions_capacity: u64,

    /// Number of entries dropped on read because they had expired
    pub evictions_ttl: u64,

    /// Number of manual removals
    pub invalidations: u64,
}

impl CacheStats {
    /// Calculate cache hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }

    /// Calculate miss rate as a percentage
    pub fn miss_rate(&self) -> f64 {
        100.0 - self.hit_rate()
    }

    /// Calculate total evictions
    pub fn total_evictions(&self) -> u64 {
        self.evictions_capacity + self.evictions_ttl
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CacheStats {{ hits: {}, misses: {}, hit_rate: {:.2}%, entries: {}, evictions: {} }}",
            self.hits,
            self.misses,
            self.hit_rate(),
            self.entries,
            self.total_evictions()
        )
    }
}
