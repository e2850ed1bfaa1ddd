//! Limiting strategies.
//!
//! Each strategy is a small, stateless description of the algorithm (rate, capacity,
//! window). The mutable per-identifier data lives in the strategy's associated
//! [`Strategy::State`], owned by the [`StateStore`](crate::rate_limit::store::StateStore)
//! and only touched while that identifier's lock is held.
//!
//! Every decision is split into three steps so each can be tested on its own:
//! 1. [`Strategy::advance`] brings time-dependent bookkeeping (refill, leak, window roll,
//!    log pruning) up to `now`.
//! 2. [`Strategy::evaluate`] decides without mutating anything.
//! 3. [`Strategy::consume`] applies an admitted cost.

use crate::config::{Algorithm, LimiterConfig};
use crate::error::ConfigError;
use crate::rate_limit::Decision;
use std::time::Duration;

pub mod fixed_window;
pub mod leaky_bucket;
pub mod sliding_window;
pub mod token_bucket;

pub use fixed_window::{FixedWindow, FixedWindowState};
pub use leaky_bucket::{LeakyBucket, LeakyBucketState};
pub use sliding_window::{SlidingWindow, SlidingWindowState};
pub use token_bucket::{TokenBucket, TokenBucketState};

/// Slack for float comparisons on bucket levels, so refill rounding never turns an
/// exact fit into a rejection.
pub(crate) const LEVEL_EPSILON: f64 = 1e-9;

/// Decision contract shared by all algorithms.
pub trait Strategy: Send + Sync + std::fmt::Debug {
    /// Per-identifier state.
    type State: Send + std::fmt::Debug;

    /// Bucket size or max units per window.
    fn capacity(&self) -> u32;

    /// Fresh state for an identifier seen for the first time (or after eviction/reset).
    fn initial_state(&self, now_millis: u64) -> Self::State;

    /// Normalize time-dependent bookkeeping to `now_millis`. Never consumes quota.
    fn advance(&self, state: &mut Self::State, now_millis: u64);

    /// Decide whether `cost` fits. Expects `state` already advanced to `now_millis`.
    fn evaluate(&self, state: &Self::State, cost: u32, now_millis: u64) -> Decision;

    /// Apply an admitted `cost`. Only called after `evaluate` allowed it.
    fn consume(&self, state: &mut Self::State, cost: u32, now_millis: u64);

    /// Full decision: advance, evaluate, and consume on success.
    fn try_admit(&self, state: &mut Self::State, cost: u32, now_millis: u64) -> Decision {
        self.advance(state, now_millis);
        let decision = self.evaluate(state, cost, now_millis);
        if decision.is_allowed() {
            self.consume(state, cost, now_millis);
        }
        decision
    }

    /// Decision without consumption; time bookkeeping is still normalized.
    fn peek(&self, state: &mut Self::State, cost: u32, now_millis: u64) -> Decision {
        self.advance(state, now_millis);
        self.evaluate(state, cost, now_millis)
    }
}

/// The four strategies behind a single type, selected from a [`LimiterConfig`].
#[derive(Debug, Clone)]
pub enum AnyStrategy {
    /// See [`TokenBucket`].
    TokenBucket(TokenBucket),
    /// See [`LeakyBucket`].
    LeakyBucket(LeakyBucket),
    /// See [`FixedWindow`].
    FixedWindow(FixedWindow),
    /// See [`SlidingWindow`].
    SlidingWindow(SlidingWindow),
}

/// State matching [`AnyStrategy`].
#[derive(Debug, Clone, PartialEq)]
pub enum AnyState {
    /// Token bucket state.
    TokenBucket(TokenBucketState),
    /// Leaky bucket state.
    LeakyBucket(LeakyBucketState),
    /// Fixed window state.
    FixedWindow(FixedWindowState),
    /// Sliding window state.
    SlidingWindow(SlidingWindowState),
}

impl AnyStrategy {
    /// Build the strategy named by `config.algorithm()`.
    pub fn from_config(config: &LimiterConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(match config.algorithm() {
            Algorithm::TokenBucket => {
                Self::TokenBucket(TokenBucket::new(config.rate(), config.capacity())?)
            }
            Algorithm::LeakyBucket => {
                Self::LeakyBucket(LeakyBucket::new(config.rate(), config.capacity())?)
            }
            Algorithm::FixedWindow => {
                Self::FixedWindow(FixedWindow::new(config.capacity(), config.window())?)
            }
            Algorithm::SlidingWindow => {
                Self::SlidingWindow(SlidingWindow::new(config.capacity(), config.window())?)
            }
        })
    }

    /// Which algorithm this is.
    pub fn algorithm(&self) -> Algorithm {
        match self {
            Self::TokenBucket(_) => Algorithm::TokenBucket,
            Self::LeakyBucket(_) => Algorithm::LeakyBucket,
            Self::FixedWindow(_) => Algorithm::FixedWindow,
            Self::SlidingWindow(_) => Algorithm::SlidingWindow,
        }
    }
}

// A state of the wrong variant cannot be produced through the limiter (the strategy is
// fixed at construction); if one is handed in anyway it is treated as a cold start.
impl Strategy for AnyStrategy {
    type State = AnyState;

    fn capacity(&self) -> u32 {
        match self {
            Self::TokenBucket(s) => s.capacity(),
            Self::LeakyBucket(s) => s.capacity(),
            Self::FixedWindow(s) => s.capacity(),
            Self::SlidingWindow(s) => s.capacity(),
        }
    }

    fn initial_state(&self, now_millis: u64) -> AnyState {
        match self {
            Self::TokenBucket(s) => AnyState::TokenBucket(s.initial_state(now_millis)),
            Self::LeakyBucket(s) => AnyState::LeakyBucket(s.initial_state(now_millis)),
            Self::FixedWindow(s) => AnyState::FixedWindow(s.initial_state(now_millis)),
            Self::SlidingWindow(s) => AnyState::SlidingWindow(s.initial_state(now_millis)),
        }
    }

    fn advance(&self, state: &mut AnyState, now_millis: u64) {
        match (self, state) {
            (Self::TokenBucket(s), AnyState::TokenBucket(st)) => s.advance(st, now_millis),
            (Self::LeakyBucket(s), AnyState::LeakyBucket(st)) => s.advance(st, now_millis),
            (Self::FixedWindow(s), AnyState::FixedWindow(st)) => s.advance(st, now_millis),
            (Self::SlidingWindow(s), AnyState::SlidingWindow(st)) => s.advance(st, now_millis),
            (_, state) => *state = self.initial_state(now_millis),
        }
    }

    fn evaluate(&self, state: &AnyState, cost: u32, now_millis: u64) -> Decision {
        match (self, state) {
            (Self::TokenBucket(s), AnyState::TokenBucket(st)) => s.evaluate(st, cost, now_millis),
            (Self::LeakyBucket(s), AnyState::LeakyBucket(st)) => s.evaluate(st, cost, now_millis),
            (Self::FixedWindow(s), AnyState::FixedWindow(st)) => s.evaluate(st, cost, now_millis),
            (Self::SlidingWindow(s), AnyState::SlidingWindow(st)) => {
                s.evaluate(st, cost, now_millis)
            }
            _ => self.evaluate(&self.initial_state(now_millis), cost, now_millis),
        }
    }

    fn consume(&self, state: &mut AnyState, cost: u32, now_millis: u64) {
        match (self, state) {
            (Self::TokenBucket(s), AnyState::TokenBucket(st)) => s.consume(st, cost, now_millis),
            (Self::LeakyBucket(s), AnyState::LeakyBucket(st)) => s.consume(st, cost, now_millis),
            (Self::FixedWindow(s), AnyState::FixedWindow(st)) => s.consume(st, cost, now_millis),
            (Self::SlidingWindow(s), AnyState::SlidingWindow(st)) => {
                s.consume(st, cost, now_millis)
            }
            (_, state) => {
                *state = self.initial_state(now_millis);
                self.consume(state, cost, now_millis);
            }
        }
    }
}

/// Convert a wait in seconds to a `Duration`, rounded up to the clock's millisecond
/// resolution so that waiting exactly `retry_after` is enough.
pub(crate) fn wait_from_secs(secs: f64) -> Duration {
    if secs.is_nan() || secs <= 0.0 {
        return Duration::ZERO;
    }
    if secs.is_infinite() {
        return Duration::MAX;
    }
    // Shave float noise (0.20000000000000004s) before rounding up.
    let millis = (secs * 1_000.0 - 1e-6).ceil().max(1.0);
    if millis >= u64::MAX as f64 {
        Duration::MAX
    } else {
        Duration::from_millis(millis as u64)
    }
}

pub(crate) fn elapsed_secs(from_millis: u64, now_millis: u64) -> f64 {
    now_millis.saturating_sub(from_millis) as f64 / 1_000.0
}

pub(crate) fn window_millis(window: Duration) -> Result<u64, ConfigError> {
    match u64::try_from(window.as_millis()) {
        Ok(0) => Err(ConfigError::InvalidWindow(window)),
        Ok(ms) => Ok(ms),
        Err(_) => Ok(u64::MAX),
    }
}

pub(crate) fn validate_rate(rate: f64) -> Result<f64, ConfigError> {
    if rate.is_finite() && rate > 0.0 {
        Ok(rate)
    } else {
        Err(ConfigError::InvalidRate { provided: rate })
    }
}

pub(crate) fn validate_capacity(capacity: u32) -> Result<u32, ConfigError> {
    if capacity == 0 {
        Err(ConfigError::InvalidCapacity { provided: capacity })
    } else {
        Ok(capacity)
    }
}
