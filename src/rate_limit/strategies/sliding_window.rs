//! Exact sliding-window log.

use super::{validate_capacity, window_millis, Strategy};
use crate::error::ConfigError;
use crate::rate_limit::{Decision, DenyReason};
use std::collections::VecDeque;
use std::time::Duration;

/// A sliding-window log.
///
/// Admits at most `capacity` units within any trailing interval `(now - window, now]`.
/// Units admitted at the same millisecond share one log slot, so the log never holds
/// more than `capacity` slots. Stale slots are pruned lazily on each decision.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    capacity: u32,
    window_millis: u64,
}

/// Per-identifier log of admissions, oldest first.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SlidingWindowState {
    log: VecDeque<(u64, u32)>,
    total: u64,
}

impl SlidingWindowState {
    /// Units currently counted against the window.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Number of distinct timestamps held.
    pub fn slots(&self) -> usize {
        self.log.len()
    }

    /// Timestamp of the oldest counted admission.
    pub fn oldest_millis(&self) -> Option<u64> {
        self.log.front().map(|(ts, _)| *ts)
    }

    /// Iterate `(timestamp, units)` pairs, oldest first.
    pub fn entries(&self) -> impl Iterator<Item = (u64, u32)> + '_ {
        self.log.iter().copied()
    }
}

impl SlidingWindow {
    /// Create a log admitting `capacity` units per trailing `window` (at least 1ms).
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

    fn expires_at(&self, ts: u64) -> u64 {
        ts.saturating_add(self.window_millis)
    }
}

impl Strategy for SlidingWindow {
    type State = SlidingWindowState;

    fn capacity(&self) -> u32 {
        self.capacity
    }

    fn initial_state(&self, _now_millis: u64) -> SlidingWindowState {
        SlidingWindowState::default()
    }

    fn advance(&self, state: &mut SlidingWindowState, now_millis: u64) {
        while let Some(&(ts, units)) = state.log.front() {
            if self.expires_at(ts) > now_millis {
                break;
            }
            state.log.pop_front();
            state.total -= u64::from(units);
        }
    }

    fn evaluate(&self, state: &SlidingWindowState, cost: u32, now_millis: u64) -> Decision {
        if cost > self.capacity {
            return Decision::exceeds_capacity();
        }
        let capacity = u64::from(self.capacity);
        let after = state.total + u64::from(cost);
        if after <= capacity {
            return Decision::Allowed {
                remaining: u32::try_from(capacity - after).unwrap_or(u32::MAX),
            };
        }

        // Walk the log until enough units would have aged out.
        let needed = after - capacity;
        let mut freed = 0u64;
        let mut retry_at = now_millis;
        for &(ts, units) in &state.log {
            freed += u64::from(units);
            retry_at = self.expires_at(ts);
            if freed >= needed {
                break;
            }
        }
        let wait = retry_at.saturating_sub(now_millis).max(1);
        Decision::Denied {
            retry_after: Some(Duration::from_millis(wait)),
            reason: DenyReason::Exhausted,
        }
    }

    fn consume(&self, state: &mut SlidingWindowState, cost: u32, now_millis: u64) {
        if cost == 0 {
            return;
        }
        match state.log.back_mut() {
            Some((ts, units)) if *ts >= now_millis => *units += cost,
            _ => state.log.push_back((now_millis, cost)),
        }
        state.total += u64::from(cost);
    }
}
