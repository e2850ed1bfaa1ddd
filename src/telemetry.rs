//! Limiter events and sinks.
//!
//! A [`RateLimiter`](crate::RateLimiter) emits a [`LimiterEvent`] for every decision,
//! reset, and eviction sweep that removed something. Sinks are synchronous and called
//! outside any per-identifier lock, so a slow sink slows only its caller.
//!
//! - [`NullSink`]: drops everything (the default).
//! - [`LogSink`]: logs each event through `tracing` at INFO.
//! - [`MemorySink`]: bounded in-memory buffer, useful in tests.

use crate::rate_limit::DenyReason;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Something a limiter did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LimiterEvent {
    /// A request was admitted.
    Admitted {
        /// Units consumed.
        cost: u32,
        /// Units left afterwards.
        remaining: u32,
    },
    /// A request was rejected.
    Rejected {
        /// Units requested.
        cost: u32,
        /// Why.
        reason: DenyReason,
        /// Suggested wait, if any.
        retry_after: Option<Duration>,
    },
    /// An identifier was forced back to its initial state.
    Reset,
    /// An eviction sweep removed idle identifiers.
    Evicted {
        /// How many were removed.
        count: usize,
    },
}

impl fmt::Display for LimiterEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimiterEvent::Admitted { cost, remaining } => {
                write!(f, "Admitted(cost={}, remaining={})", cost, remaining)
            }
            LimiterEvent::Rejected {
                cost,
                reason,
                retry_after: Some(wait),
            } => write!(
                f,
                "Rejected(cost={cost}, reason={reason}, retry_after={wait:?})"
            ),
            LimiterEvent::Rejected {
                cost,
                reason,
                retry_after: None,
            } => write!(f, "Rejected(cost={}, reason={})", cost, reason),
            LimiterEvent::Reset => write!(f, "Reset"),
            LimiterEvent::Evicted { count } => write!(f, "Evicted(count={})", count),
        }
    }
}

/// Receiver of limiter events.
pub trait EventSink: Send + Sync + fmt::Debug {
    /// Handle one event. Must not panic and should return quickly.
    fn emit(&self, event: &LimiterEvent);
}

/// A sink that discards all events.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &LimiterEvent) {}
}

/// A sink that logs events using the `tracing` crate.
///
/// ```rust
/// use ratewarden::telemetry::{EventSink, LimiterEvent, LogSink};
///
/// // Logs: "limiter_event{event=Admitted(cost=1, remaining=4)}"
/// LogSink.emit(&LimiterEvent::Admitted { cost: 1, remaining: 4 });
/// ```
#[derive(Clone, Copy, Debug, Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: &LimiterEvent) {
        tracing::info!(target: "ratewarden::telemetry", event = %event, "limiter_event");
    }
}

/// A sink that stores events in memory.
///
/// Bounded: once `capacity` events are held, the oldest is dropped for each new one and
/// counted in [`MemorySink::evicted`]. Clones share the same buffer.
///
/// ```rust
/// use ratewarden::telemetry::{EventSink, LimiterEvent, MemorySink};
///
/// let sink = MemorySink::with_capacity(2);
/// sink.emit(&LimiterEvent::Reset);
/// assert_eq!(sink.events(), vec![LimiterEvent::Reset]);
/// ```
#[derive(Clone, Debug)]
pub struct MemorySink {
    events: Arc<Mutex<VecDeque<LimiterEvent>>>,
    capacity: usize,
    evicted: Arc<AtomicU64>,
}

impl MemorySink {
    /// Creates a bounded memory sink (default cap: 10,000).
    pub fn new() -> Self {
        Self::with_capacity(10_000)
    }

    /// Creates a bounded memory sink with explicit capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(VecDeque::new())),
            capacity: capacity.max(1),
            evicted: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Snapshot of held events, oldest first.
    pub fn events(&self) -> Vec<LimiterEvent> {
        self.lock().iter().cloned().collect()
    }

    /// Drop all held events.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Number of held events.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no events are held.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Maximum number of held events.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Events dropped to respect the capacity.
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<LimiterEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: &LimiterEvent) {
        let mut events = self.lock();
        if events.len() >= self.capacity {
            events.pop_front();
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        events.push_back(event.clone());
    }
}
