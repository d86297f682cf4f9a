//! Configuration for per-identity rate limiting

use crate::config::MAX_DURATION;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Request quota applied to every identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Requests admitted per window
    pub max_requests: u32,

    /// Length of a window
    pub window: Duration,

    /// Tracked identities at which `admit` drops elapsed windows
    ///
    /// After a sweep the threshold moves to twice the live count, so the
    /// map stays proportional to the identities active within one window.
    #[serde(default = "default_sweep_threshold")]
    pub sweep_threshold: usize,
}

fn default_sweep_threshold() -> usize {
    1024
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window: Duration::from_secs(60),
            sweep_threshold: default_sweep_threshold(),
        }
    }
}

impl RateLimitConfig {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            ..Default::default()
        }
    }

    /// Create a new builder for rate limit configuration
    pub fn builder() -> RateLimitConfigBuilder {
        RateLimitConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.max_requests == 0 {
            return Err("max_requests must be greater than 0".to_string());
        }

        if self.window.is_zero() {
            return Err("window must be greater than 0".to_string());
        }

        if self.window > MAX_DURATION {
            return Err(format!("window must be at most {}s", MAX_DURATION.as_secs()));
        }

        if self.sweep_threshold == 0 {
            return Err("sweep_threshold must be greater than 0".to_string());
        }

        Ok(())
    }
}

/// Builder for rate limit configuration
#[derive(Debug, Default)]
pub struct RateLimitConfigBuilder {
    max_requests: Option<u32>,
    window: Option<Duration>,
    sweep_threshold: Option<usize>,
}

impl RateLimitConfigBuilder {
    /// Set the number of requests admitted per window
    pub fn max_requests(mut self, max: u32) -> Self {
        self.max_requests = Some(max);
        self
    }

    /// Set the window length
    pub fn window(mut self, window: Duration) -> Self {
        self.window = Some(window);
        self
    }

    /// Set how many tracked identities trigger a sweep of elapsed windows
    pub fn sweep_threshold(mut self, threshold: usize) -> Self {
        self.sweep_threshold = Some(threshold);
        self
    }

    pub fn build(self) -> RateLimitConfig {
        let defaults = RateLimitConfig::default();

        RateLimitConfig {
            max_requests: self.max_requests.unwrap_or(defaults.max_requests),
            window: self.window.unwrap_or(defaults.window),
            sweep_threshold: self.sweep_threshold.unwrap_or(defaults.sweep_threshold),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RateLimitConfig::default();
        assert_eq!(config.max_requests, 100);
        assert_eq!(config.window, Duration::from_secs(60));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        assert!(RateLimitConfig::new(0, Duration::from_secs(60)).validate().is_err());
        assert!(RateLimitConfig::new(10, Duration::ZERO).validate().is_err());
        assert!(RateLimitConfig::new(10, Duration::from_secs(u64::MAX))
            .validate()
            .is_err());
        assert!(RateLimitConfig::builder()
            .sweep_threshold(0)
            .build()
            .validate()
            .is_err());
    }

    #[test]
    fn test_config_builder() {
        let config = RateLimitConfig::builder()
            .max_requests(2)
            .window(Duration::from_secs(30))
            .build();

        assert_eq!(config, RateLimitConfig::new(2, Duration::from_secs(30)));
    }
}
