//! Error types for limiter construction and the service adapter.
//!
//! Rejections are not errors: `allow`/`check` report them as ordinary results. The only
//! hard failure a limiter can produce is a [`ConfigError`] at construction time.
use crate::rate_limit::DenyReason;
use std::fmt;
use std::time::Duration;

/// Errors produced when validating limiter configuration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// Rate must be finite and > 0.
    #[error("rate must be a finite value > 0 (got {provided})")]
    InvalidRate {
        /// Value provided by caller.
        provided: f64,
    },
    /// Capacity must be > 0.
    #[error("capacity must be > 0 (got {provided})")]
    InvalidCapacity {
        /// Value provided by caller.
        provided: u32,
    },
    /// Window must span at least one clock tick (1ms).
    #[error("window must be at least 1ms (got {0:?})")]
    InvalidWindow(Duration),
    /// Idle eviction TTL must be > 0.
    #[error("eviction_ttl must be > 0 (got {0:?})")]
    InvalidEvictionTtl(Duration),
    /// Algorithm name did not match any known strategy.
    #[error("unknown algorithm '{0}' (expected token_bucket, leaky_bucket, fixed_window or sliding_window)")]
    UnknownAlgorithm(String),
}

/// Error returned by [`RateLimitService`](crate::rate_limit::RateLimitService).
#[derive(Debug, Clone)]
pub enum LimitError<E> {
    /// The limiter rejected the request; the inner service was not called.
    RateLimited {
        /// Suggested wait before retrying, when one exists.
        retry_after: Option<Duration>,
        /// Why the request was rejected.
        reason: DenyReason,
    },
    /// The inner service failed.
    Inner(E),
}

impl<E: fmt::Display> fmt::Display for LimitError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RateLimited {
                retry_after: Some(wait),
                reason,
            } => write!(f, "rate limited ({}); retry after {:?}", reason, wait),
            Self::RateLimited {
                retry_after: None,
                reason,
            } => write!(f, "rate limited ({reason}); request can never be admitted"),
            Self::Inner(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for LimitError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Inner(e) => Some(e),
            Self::RateLimited { .. } => None,
        }
    }
}

impl<E> LimitError<E> {
    /// Check if this error is a limiter rejection.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
    /// Suggested wait for a rejection, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            Self::Inner(_) => None,
        }
    }
    /// Get the inner error if this is an Inner variant
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }
    /// Borrow the inner error if present.
    pub fn as_inner(&self) -> Option<&E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }
}
