//! Aligned fixed-window counter.

use super::{validate_capacity, window_millis, Strategy};
use crate::error::ConfigError;
use crate::rate_limit::{Decision, DenyReason};
use std::time::Duration;

/// A fixed-window counter.
///
/// Time is cut into contiguous, aligned windows of `window` length:
/// `window_start = floor(now / window) * window`. Each window admits at most `capacity`
/// units and its counter is discarded when the next window begins.
///
/// A burst at the end of one window followed by a burst at the start of the next is
/// admitted in full, so up to `2 * capacity` units can pass within less than one
/// window. Use [`SlidingWindow`](super::SlidingWindow) when that matters.
#[derive(Debug, Clone)]
pub struct FixedWindow {
    capacity: u32,
    window_millis: u64,
}

/// Per-identifier fixed window state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedWindowState {
    window_start_millis: u64,
    count: u64,
}

impl FixedWindowState {
    /// Start of the window the counter belongs to.
    pub fn window_start_millis(&self) -> u64 {
        self.window_start_millis
    }

    /// Units admitted in that window.
    pub fn count(&self) -> u64 {
        self.count
    }
}

impl FixedWindow {
    /// Create a counter admitting `capacity` units per `window` (at least 1ms).
    pub fn new(capacity: u32, window: Duration) -> Result<Self, ConfigError> {
        Ok(Self {
            capacity: validate_capacity(capacity)?,
            window_millis: window_millis(window)?,
        })
    }

    /// Window length.
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_millis)
    }

    /// Start of the aligned window containing `now_millis`.
    pub fn window_start(&self, now_millis: u64) -> u64 {
        now_millis - now_millis % self.window_millis
    }
}

impl Strategy for FixedWindow {
    type State = FixedWindowState;

    fn capacity(&self) -> u32 {
        self.capacity
    }

    fn initial_state(&self, now_millis: u64) -> FixedWindowState {
        FixedWindowState {
            window_start_millis: self.window_start(now_millis),
            count: 0,
        }
    }

    fn advance(&self, state: &mut FixedWindowState, now_millis: u64) {
        let current = self.window_start(now_millis);
        if current > state.window_start_millis {
            state.window_start_millis = current;
            state.count = 0;
        }
    }

    fn evaluate(&self, state: &FixedWindowState, cost: u32, now_millis: u64) -> Decision {
        if cost > self.capacity {
            return Decision::exceeds_capacity();
        }
        let capacity = u64::from(self.capacity);
        let after = state.count + u64::from(cost);
        if after <= capacity {
            let remaining = u32::try_from(capacity - after).unwrap_or(u32::MAX);
            Decision::Allowed { remaining }
        } else {
            let window_end = state.window_start_millis.saturating_add(self.window_millis);
            let wait = window_end.saturating_sub(now_millis).max(1);
            Decision::Denied {
                retry_after: Some(Duration::from_millis(wait)),
                reason: DenyReason::Exhausted,
            }
        }
    }

    fn consume(&self, state: &mut FixedWindowState, cost: u32, _now_millis: u64) {
        state.count += u64::from(cost);
    }
}
