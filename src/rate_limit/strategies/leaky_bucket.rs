//! Leaky bucket: a level that drains at a constant rate.

use super::{
    elapsed_secs, validate_capacity, validate_rate, wait_from_secs, Strategy, LEVEL_EPSILON,
};
use crate::error::ConfigError;
use crate::rate_limit::{Decision, DenyReason};

/// A Leaky Bucket rate limiter.
///
/// The inverse framing of [`TokenBucket`](super::TokenBucket): admitted requests raise a
/// level by `cost`, and the level drains at `rate` units per second. A request is admitted
/// only while `level + cost <= capacity`, which gives a smoother admission profile than a
/// token bucket once the bucket has filled.
#[derive(Debug, Clone)]
pub struct LeakyBucket {
    rate: f64,
    capacity: u32,
}

/// Per-identifier leaky bucket state. Invariant: `0 <= level <= capacity`.
#[derive(Debug, Clone, PartialEq)]
pub struct LeakyBucketState {
    level: f64,
    last_leak_millis: u64,
}

impl LeakyBucketState {
    /// Current fill level (as of the last leak).
    pub fn level(&self) -> f64 {
        self.level
    }

    /// Time of the last leak.
    pub fn last_leak_millis(&self) -> u64 {
        self.last_leak_millis
    }
}

impl LeakyBucket {
    /// Create a bucket; `rate` must be finite and > 0, `capacity` > 0.
    pub fn new(rate: f64, capacity: u32) -> Result<Self, ConfigError> {
        Ok(Self {
            rate: validate_rate(rate)?,
            capacity: validate_capacity(capacity)?,
        })
    }

    /// Units drained per second.
    pub fn rate(&self) -> f64 {
        self.rate
    }
}

impl Strategy for LeakyBucket {
    type State = LeakyBucketState;

    fn capacity(&self) -> u32 {
        self.capacity
    }

    fn initial_state(&self, now_millis: u64) -> LeakyBucketState {
        LeakyBucketState {
            level: 0.0,
            last_leak_millis: now_millis,
        }
    }

    fn advance(&self, state: &mut LeakyBucketState, now_millis: u64) {
        let elapsed = elapsed_secs(state.last_leak_millis, now_millis);
        state.level = (state.level - elapsed * self.rate).max(0.0);
        state.last_leak_millis = state.last_leak_millis.max(now_millis);
    }

    fn evaluate(&self, state: &LeakyBucketState, cost: u32, _now_millis: u64) -> Decision {
        if cost > self.capacity {
            return Decision::exceeds_capacity();
        }
        let capacity = f64::from(self.capacity);
        let after = state.level + f64::from(cost);
        if after <= capacity + LEVEL_EPSILON {
            Decision::allowed(capacity - after)
        } else {
            Decision::Denied {
                retry_after: Some(wait_from_secs((after - capacity) / self.rate)),
                reason: DenyReason::Exhausted,
            }
        }
    }

    fn consume(&self, state: &mut LeakyBucketState, cost: u32, _now_millis: u64) {
        state.level = (state.level + f64::from(cost)).min(f64::from(self.capacity));
    }
}
