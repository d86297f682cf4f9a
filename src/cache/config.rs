//! Configuration for the response cache

use crate::cache::types::TtlClass;
use crate::config::MAX_DURATION;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the response cache
///
/// Defaults follow the financial service: one hour for realtime
/// answers, a day for historical ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of entries in the cache
    pub max_entries: usize,

    /// Lifetime of entries classified as realtime
    pub realtime_ttl: Duration,

    /// Lifetime of entries classified as historical
    pub historical_ttl: Duration,

    /// TTL jitter factor (0.0 - 1.0)
    /// Shortens each lifetime by a random fraction up to this value so
    /// entries written together do not expire together. Never extends it.
    pub ttl_jitter: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            realtime_ttl: Duration::from_secs(3600),
            historical_ttl: Duration::from_secs(86_400),
            ttl_jitter: 0.0,
        }
    }
}

impl CacheConfig {
    /// Create a new builder for cache configuration
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.max_entries == 0 {
            return Err("max_entries must be greater than 0".to_string());
        }

        if self.realtime_ttl.is_zero() || self.historical_ttl.is_zero() {
            return Err("TTLs must be greater than 0".to_string());
        }

        if self.realtime_ttl > MAX_DURATION || self.historical_ttl > MAX_DURATION {
            return Err(format!("TTLs must be at most {}s", MAX_DURATION.as_secs()));
        }

        if !(0.0..=1.0).contains(&self.ttl_jitter) {
            return Err("ttl_jitter must be between 0.0 and 1.0".to_string());
        }

        Ok(())
    }

    /// Base lifetime for a class, without jitter
    pub fn base_ttl(&self, class: TtlClass) -> Duration {
        match class {
            TtlClass::Realtime => self.realtime_ttl,
            TtlClass::Historical => self.historical_ttl,
        }
    }

    /// Lifetime for a class with jitter applied
    pub fn ttl_for(&self, class: TtlClass) -> Duration {
        let base = self.base_ttl(class);
        let jitter = if self.ttl_jitter.is_finite() {
            self.ttl_jitter.clamp(0.0, 1.0)
        } else {
            0.0
        };
        if jitter == 0.0 {
            return base;
        }

        let cut = rand::random::<f64>() * jitter;
        base.min(MAX_DURATION).mul_f64(1.0 - cut)
    }

    /// Configuration for memory-constrained environments
    pub fn small() -> Self {
        Self {
            max_entries: 1_000,
            ..Default::default()
        }
    }

    /// Configuration for large-scale deployments
    pub fn large() -> Self {
        Self {
            max_entries: 1_000_000,
            ttl_jitter: 0.10,
            ..Default::default()
        }
    }
}

/// Builder for cache configuration
#[derive(Debug, Default)]
pub struct CacheConfigBuilder {
    max_entries: Option<usize>,
    realtime_ttl: Option<Duration>,
    historical_ttl: Option<Duration>,
    ttl_jitter: Option<f64>,
}

impl CacheConfigBuilder {
    /// Set maximum number of cache entries
    pub fn max_entries(mut self, max: usize) -> Self {
        self.max_entries = Some(max);
        self
    }

    /// Set the lifetime of realtime entries
    pub fn realtime_ttl(mut self, ttl: Duration) -> Self {
        self.realtime_ttl = Some(ttl);
        self
    }

    /// Set the lifetime of historical entries
    pub fn historical_ttl(mut self, ttl: Duration) -> Self {
        self.historical_ttl = Some(ttl);
        self
    }

    /// Set TTL jitter factor (0.0 - 1.0)
    pub fn ttl_jitter(mut self, jitter: f64) -> Self {
        self.ttl_jitter = Some(jitter);
        self
    }

    /// Build the cache configuration
    pub fn build(self) -> CacheConfig {
        let defaults = CacheConfig::default();

        CacheConfig {
            max_entries: self.max_entries.unwrap_or(defaults.max_entries),
            realtime_ttl: self.realtime_ttl.unwrap_or(defaults.realtime_ttl),
            historical_ttl: self.historical_ttl.unwrap_or(defaults.historical_ttl),
            ttl_jitter: self.ttl_jitter.unwrap_or(defaults.ttl_jitter),
        }
    }
}
