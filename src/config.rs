//! Service-wide configuration
//!
//! Groups the cache and rate-limit settings with the orchestrator's own
//! knobs, and loads them from the environment (and an optional `.env`).

use crate::cache::CacheConfig;
use crate::error::{QueryError, Result};
use crate::rate_limit::RateLimitConfig;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Longest TTL, window or timeout a configuration may carry
pub const MAX_DURATION: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// `now + duration`, never further out than [`MAX_DURATION`]
pub(crate) fn instant_after(now: Instant, duration: Duration) -> Instant {
    now + duration.min(MAX_DURATION)
}

/// Configuration for the query orchestrator and the components it owns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub cache: CacheConfig,

    pub rate_limit: RateLimitConfig,

    /// Deadline applied to requests that do not carry their own
    pub request_timeout: Duration,

    /// Retrieved snippets scoring below this are not sent to the generator
    pub min_relevance: f64,

    /// How much of a query is echoed into logs
    pub max_query_log_chars: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            rate_limit: RateLimitConfig::default(),
            request_timeout: Duration::from_secs(30),
            min_relevance: 0.7,
            max_query_log_chars: 50,
        }
    }
}

impl ServiceConfig {
    /// Load configuration from the process environment
    ///
    /// A `.env` file in the working directory is read first if present.
    /// Unset variables keep their defaults; malformed ones are an error.
    pub fn from_env() -> Result<Self> {
        if let Ok(path) = dotenv::dotenv() {
            debug!("Loaded environment from {}", path.display());
        }
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(secs) = parse_var::<u64, _>(&lookup, "CACHE_TTL_REALTIME")? {
            config.cache.realtime_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "CACHE_TTL_HISTORICAL")? {
            config.cache.historical_ttl = Duration::from_secs(secs);
        }
        if let Some(max) = parse_var(&lookup, "CACHE_MAX_ENTRIES")? {
            config.cache.max_entries = max;
        }
        if let Some(jitter) = parse_var(&lookup, "CACHE_TTL_JITTER")? {
            config.cache.ttl_jitter = jitter;
        }
        if let Some(max) = parse_var(&lookup, "RATE_LIMIT_MAX_REQUESTS")? {
            config.rate_limit.max_requests = max;
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "RATE_LIMIT_WINDOW_SECONDS")? {
            config.rate_limit.window = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "REQUEST_TIMEOUT_SECONDS")? {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(score) = parse_var(&lookup, "MIN_RELEVANCE_SCORE")? {
            config.min_relevance = score;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.cache.validate().map_err(QueryError::Config)?;
        self.rate_limit.validate().map_err(QueryError::Config)?;

        if self.request_timeout.is_zero() {
            return Err(QueryError::Config(
                "request_timeout must be greater than 0".to_string(),
            ));
        }

        if self.request_timeout > MAX_DURATION {
            return Err(QueryError::Config(format!(
                "request_timeout must be at most {}s",
                MAX_DURATION.as_secs()
            )));
        }

        if !(0.0..=1.0).contains(&self.min_relevance) {
            return Err(QueryError::Config(
                "min_relevance must be between 0.0 and 1.0".to_string(),
            ));
        }

        Ok(())
    }
}

fn parse_var<T, F>(lookup: &F, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| QueryError::Config(format!("{}={:?}: {}", name, raw, e))),
    }
}
