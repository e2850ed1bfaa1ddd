#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # ratewarden
//!
//! In-process, per-identifier rate limiting with four interchangeable strategies.
//!
//! ## Features
//!
//! - **Token bucket**: bursts up to capacity, long-run rate bounded by refill
//! - **Leaky bucket**: smooth admission driven by a draining level
//! - **Fixed window**: cheap aligned counters (boundary bursts allowed)
//! - **Sliding window**: exact trailing-window bound, no boundary bursts
//! - **Fine-grained locking**: one lock per identifier, sharded map, no global lock
//! - **Idle eviction**: state for quiet identifiers is reclaimed after a TTL
//! - **Injectable clock** for deterministic tests
//! - **Tower middleware** to guard any `Service`
//!
//! ## Quick Start
//!
//! ```rust
//! use ratewarden::{LimiterConfig, RateLimiter};
//!
//! let limiter: RateLimiter<String> =
//!     RateLimiter::new(LimiterConfig::token_bucket(5.0, 10)?)?;
//!
//! if limiter.allow("api-key-42") {
//!     // handle the request
//! } else {
//!     // reply 429
//! }
//! # Ok::<(), ratewarden::ConfigError>(())
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod presets;
pub mod rate_limit;
pub mod telemetry;

// Re-exports
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{Algorithm, LimiterConfig, LimiterConfigBuilder};
pub use error::{ConfigError, LimitError};
pub use rate_limit::strategies::{
    AnyState, AnyStrategy, FixedWindow, LeakyBucket, SlidingWindow, Strategy, TokenBucket,
};
pub use rate_limit::{Decision, DenyReason, RateLimitLayer, RateLimitService, RateLimiter};
