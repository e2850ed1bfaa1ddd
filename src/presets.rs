//! Ready-made limiter configurations.
//!
//! ```rust
//! use ratewarden::{presets, RateLimiter};
//!
//! let limiter: RateLimiter<String> = RateLimiter::new(presets::api_per_user()?)?;
//! assert!(limiter.allow("user-1"));
//! # Ok::<(), ratewarden::ConfigError>(())
//! ```
//!
//! - [`api_per_user`]: bursty API traffic (token bucket).
//! - [`login_attempts`]: brute-force protection (sliding window, long memory).
//! - [`smooth_egress`]: even outbound pacing (leaky bucket).
//! - [`strict_per_minute`]: hard per-minute quota with no boundary bursts (sliding window).

use crate::config::LimiterConfig;
use crate::error::ConfigError;
use std::time::Duration;

const API_RATE_PER_SEC: f64 = 10.0;
const API_BURST: u32 = 20;
const LOGIN_ATTEMPTS: u32 = 5;
const LOGIN_WINDOW_SECS: u64 = 15 * 60;
const LOGIN_EVICTION_SECS: u64 = 60 * 60;
const MINUTE: Duration = Duration::from_secs(60);

/// 10 requests/second sustained with bursts of 20.
pub fn api_per_user() -> Result<LimiterConfig, ConfigError> {
    LimiterConfig::token_bucket(API_RATE_PER_SEC, API_BURST)
}

/// 5 attempts per trailing 15 minutes; state kept for an hour of inactivity.
pub fn login_attempts() -> Result<LimiterConfig, ConfigError> {
    LimiterConfig::sliding_window(LOGIN_ATTEMPTS, Duration::from_secs(LOGIN_WINDOW_SECS))?
        .with_eviction_ttl(Duration::from_secs(LOGIN_EVICTION_SECS))
}

/// Leaky bucket draining `rate_per_sec`, buffering about one second of traffic.
pub fn smooth_egress(rate_per_sec: f64) -> Result<LimiterConfig, ConfigError> {
    let capacity = if rate_per_sec.is_finite() && rate_per_sec >= 1.0 {
        rate_per_sec.ceil().min(f64::from(u32::MAX)) as u32
    } else {
        1
    };
    LimiterConfig::leaky_bucket(rate_per_sec, capacity)
}

/// At most `requests` per trailing minute.
pub fn strict_per_minute(requests: u32) -> Result<LimiterConfig, ConfigError> {
    LimiterConfig::sliding_window(requests, MINUTE)
}
