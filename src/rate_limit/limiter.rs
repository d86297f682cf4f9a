//! Fixed-window admission control keyed by identity

use crate::config::{instant_after, MAX_DURATION};
use crate::rate_limit::config::RateLimitConfig;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Outcome of an admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The request may proceed; `remaining` slots are left in this window
    Allowed { remaining: u32 },

    /// The quota is exhausted until the window resets
    Denied { retry_after: Duration },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed { .. })
    }
}

/// Read-only view of an identity's quota
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitStatus {
    /// Requests still admissible in the current window
    pub remaining: u32,

    /// Time until the quota is refilled
    pub reset_after: Duration,

    /// Wall-clock time at which the quota is refilled
    pub reset_at: DateTime<Utc>,
}

/// The live window of one identity
#[derive(Debug, Clone)]
pub struct RateLimitWindow {
    pub identity: String,
    pub window_start: Instant,
    pub count: u32,
    pub limit: u32,
    pub window_duration: Duration,
}

impl RateLimitWindow {
    fn open(identity: &str, now: Instant, config: &RateLimitConfig) -> Self {
        Self {
            identity: identity.to_string(),
            window_start: now,
            count: 0,
            limit: config.max_requests,
            window_duration: config.window,
        }
    }

    pub fn resets_at(&self) -> Instant {
        instant_after(self.window_start, self.window_duration)
    }

    pub fn has_elapsed(&self, now: Instant) -> bool {
        now >= self.resets_at()
    }

    pub fn remaining(&self) -> u32 {
        self.limit.saturating_sub(self.count)
    }
}

/// Per-identity rate limiter
///
/// Each identity owns one window stored in a sharded map. `admit` holds
/// the shard lock for the whole check-and-increment, so two concurrent
/// calls can never both take the last slot. Windows reset lazily on the
/// first `admit` after they elapse.
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: DashMap<String, RateLimitWindow>,
    next_sweep: AtomicUsize,
}

/// Shorten an identity for logs; API keys are secrets
pub(crate) fn redact(identity: &str) -> String {
    let prefix: String = identity.chars().take(8).collect();
    format!("{}...", prefix)
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        info!(
            "Rate limiter initialized: {} requests per {:?}",
            config.max_requests, config.window
        );

        Self {
            next_sweep: AtomicUsize::new(config.sweep_threshold.max(1)),
            config,
            windows: DashMap::new(),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Admit or deny one request for `identity`
    ///
    /// Elapsed windows of other identities are dropped here once the map
    /// grows past the sweep threshold.
    pub fn admit(&self, identity: &str) -> Admission {
        let admission = self.admit_in_window(identity);
        self.sweep_if_due();
        admission
    }

    fn admit_in_window(&self, identity: &str) -> Admission {
        let now = Instant::now();

        let mut window = self
            .windows
            .entry(identity.to_string())
            .or_insert_with(|| RateLimitWindow::open(identity, now, &self.config));

        if window.has_elapsed(now) {
            window.window_start = now;
            window.count = 0;
        }

        if window.count < window.limit {
            window.count += 1;
            return Admission::Allowed {
                remaining: window.remaining(),
            };
        }

        let retry_after = window.resets_at() - now;
        warn!(
            "Rate limit exceeded for API key: {} (retry after {:?})",
            redact(identity),
            retry_after
        );
        Admission::Denied { retry_after }
    }

    fn sweep_if_due(&self) {
        if self.windows.len() < self.next_sweep.load(Ordering::Relaxed) {
            return;
        }

        let purged = self.purge_expired();
        let live = self.windows.len();
        self.next_sweep.store(
            live.saturating_mul(2).max(self.config.sweep_threshold.max(1)),
            Ordering::Relaxed,
        );
        debug!("Swept {} elapsed rate-limit windows, {} live", purged, live);
    }

    /// Quota left for `identity`, without consuming any of it
    pub fn status(&self, identity: &str) -> RateLimitStatus {
        let now = Instant::now();

        let (remaining, reset_after) = match self.windows.get(identity) {
            Some(window) if !window.has_elapsed(now) => {
                (window.remaining(), window.resets_at() - now)
            }
            _ => (self.config.max_requests, self.config.window.min(MAX_DURATION)),
        };

        let reset_at = Utc::now()
            + chrono::Duration::from_std(reset_after).unwrap_or_else(|_| chrono::Duration::zero());

        RateLimitStatus {
            remaining,
            reset_after,
            reset_at,
        }
    }

    /// Drop the window of one identity, restoring its full quota
    pub fn reset(&self, identity: &str) -> bool {
        self.windows.remove(identity).is_some()
    }

    /// Drop every window that has elapsed; returns how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.windows.len();
        self.windows.retain(|_, window| !window.has_elapsed(now));
        before.saturating_sub(self.windows.len())
    }

    /// Number of identities with a tracked window
    pub fn tracked_identities(&self) -> usize {
        self.windows.len()
    }
}
