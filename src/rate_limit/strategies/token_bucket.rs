//! Continuously refilled token bucket.

use super::{
    elapsed_secs, validate_capacity, validate_rate, wait_from_secs, Strategy, LEVEL_EPSILON,
};
use crate::error::ConfigError;
use crate::rate_limit::{Decision, DenyReason};

/// A Token Bucket rate limiter.
///
/// Holds up to `capacity` tokens, replenished continuously at `rate` tokens per second.
/// Each admitted request consumes `cost` tokens; a request that does not fit consumes
/// nothing. Allows bursts up to `capacity` while bounding long-run throughput to `rate`.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    rate: f64,
    capacity: u32,
}

/// Per-identifier token bucket state. Invariant: `0 <= tokens <= capacity`.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenBucketState {
    tokens: f64,
    last_refill_millis: u64,
}

impl TokenBucketState {
    /// Tokens currently in the bucket (as of the last refill).
    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    /// Time of the last refill.
    pub fn last_refill_millis(&self) -> u64 {
        self.last_refill_millis
    }
}

impl TokenBucket {
    /// Create a bucket; `rate` must be finite and > 0, `capacity` > 0.
    pub fn new(rate: f64, capacity: u32) -> Result<Self, ConfigError> {
        Ok(Self {
            rate: validate_rate(rate)?,
            capacity: validate_capacity(capacity)?,
        })
    }

    /// Tokens added per second.
    pub fn rate(&self) -> f64 {
        self.rate
    }
}

impl Strategy for TokenBucket {
    type State = TokenBucketState;

    fn capacity(&self) -> u32 {
        self.capacity
    }

    fn initial_state(&self, now_millis: u64) -> TokenBucketState {
        TokenBucketState {
            tokens: f64::from(self.capacity),
            last_refill_millis: now_millis,
        }
    }

    fn advance(&self, state: &mut TokenBucketState, now_millis: u64) {
        let elapsed = elapsed_secs(state.last_refill_millis, now_millis);
        state.tokens = (state.tokens + elapsed * self.rate).min(f64::from(self.capacity));
        state.last_refill_millis = state.last_refill_millis.max(now_millis);
    }

    fn evaluate(&self, state: &TokenBucketState, cost: u32, _now_millis: u64) -> Decision {
        if cost > self.capacity {
            return Decision::exceeds_capacity();
        }
        let cost = f64::from(cost);
        if state.tokens + LEVEL_EPSILON >= cost {
            Decision::allowed((state.tokens - cost).max(0.0))
        } else {
            let missing = cost - state.tokens;
            Decision::Denied {
                retry_after: Some(wait_from_secs(missing / self.rate)),
                reason: DenyReason::Exhausted,
            }
        }
    }

    fn consume(&self, state: &mut TokenBucketState, cost: u32, _now_millis: u64) {
        state.tokens = (state.tokens - f64::from(cost)).max(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn rejects_invalid_parameters() {
        assert!(matches!(
            TokenBucket::new(0.0, 1),
            Err(ConfigError::InvalidRate { .. })
        ));
        assert!(matches!(
            TokenBucket::new(1.0, 0),
            Err(ConfigError::InvalidCapacity { .. })
        ));
    }

    #[test]
    fn starts_full() {
        let bucket = TokenBucket::new(5.0, 10).unwrap();
        let state = bucket.initial_state(42);
        assert_eq!(state.tokens(), 10.0);
        assert_eq!(state.last_refill_millis(), 42);
    }

    #[test]
    fn refill_is_proportional_and_capped() {
        let bucket = TokenBucket::new(5.0, 10).unwrap();
        let mut state = TokenBucketState {
            tokens: 0.0,
            last_refill_millis: 0,
        };

        bucket.advance(&mut state, 400);
        assert!((state.tokens() - 2.0).abs() < 1e-9);
        assert_eq!(state.last_refill_millis(), 400);

        bucket.advance(&mut state, 60_000);
        assert_eq!(state.tokens(), 10.0, "refill must cap at capacity");
    }

    #[test]
    fn zero_elapsed_adds_nothing() {
        let bucket = TokenBucket::new(5.0, 10).unwrap();
        let mut state = TokenBucketState {
            tokens: 3.5,
            last_refill_millis: 100,
        };
        bucket.advance(&mut state, 100);
        assert_eq!(state.tokens(), 3.5);
    }

    #[test]
    fn earlier_timestamp_does_not_rewind() {
        let bucket = TokenBucket::new(5.0, 10).unwrap();
        let mut state = TokenBucketState {
            tokens: 1.0,
            last_refill_millis: 1_000,
        };
        bucket.advance(&mut state, 500);
        assert_eq!(state.tokens(), 1.0);
        assert_eq!(state.last_refill_millis(), 1_000);
    }

    #[test]
    fn denial_reports_time_until_enough_tokens() {
        let bucket = TokenBucket::new(5.0, 10).unwrap();
        let state = TokenBucketState {
            tokens: 0.5,
            last_refill_millis: 0,
        };
        let decision = bucket.evaluate(&state, 2, 0);
        assert_eq!(
            decision,
            Decision::Denied {
                retry_after: Some(Duration::from_millis(300)),
                reason: DenyReason::Exhausted,
            }
        );
    }

    #[test]
    fn no_partial_consumption_on_rejection() {
        let bucket = TokenBucket::new(1.0, 5).unwrap();
        let mut state = bucket.initial_state(0);
        assert!(bucket.try_admit(&mut state, 4, 0).is_allowed());
        assert!(!bucket.try_admit(&mut state, 2, 0).is_allowed());
        assert_eq!(state.tokens(), 1.0);
        assert_eq!(
            bucket.try_admit(&mut state, 1, 0),
            Decision::Allowed { remaining: 0 }
        );
    }

    #[test]
    fn waiting_retry_after_is_sufficient() {
        let bucket = TokenBucket::new(3.0, 4).unwrap();
        let mut state = bucket.initial_state(0);
        assert!(bucket.try_admit(&mut state, 4, 0).is_allowed());
        let wait = match bucket.try_admit(&mut state, 1, 0) {
            Decision::Denied {
                retry_after: Some(wait),
                ..
            } => wait,
            other => panic!("expected denial, got {other:?}"),
        };
        let at = u64::try_from(wait.as_millis()).unwrap();
        assert!(bucket.try_admit(&mut state, 1, at).is_allowed());
    }
}
