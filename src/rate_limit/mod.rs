//! Per-identity rate limiting
//!
//! A fixed window of `max_requests` per `window` is kept for every API
//! key. Admission is atomic per identity, never blocks, and reports how
//! long a denied caller should back off.

pub mod config;
pub mod limiter;

pub(crate) use limiter::redact;

pub use config::{RateLimitConfig, RateLimitConfigBuilder};
pub use limiter::{Admission, RateLimitStatus, RateLimitWindow, RateLimiter};
