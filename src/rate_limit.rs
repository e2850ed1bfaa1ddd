//! Rate limiting primitives.
//!
//! This module provides the building blocks for per-identifier rate limiting:
//! - [`RateLimiter`]: the facade callers use (`allow`, `is_allowed`, `check`, `reset`).
//! - [`Decision`]: the result of a check (Allowed/Denied) with diagnostics.
//! - [`RateLimitLayer`]: Tower middleware that enforces a limiter in front of a service.
//!
//! # Architecture
//!
//! - **Logic**: the four strategies in [`strategies`] handle the math, as pure functions
//!   of `(state, cost, now)`.
//! - **Storage**: [`store::StateStore`] owns one lock-protected state per identifier and
//!   reclaims idle ones.
//! - **Facade**: [`RateLimiter`] reads the [`Clock`], locks the identifier's entry for the
//!   whole advance/evaluate/consume step, then reports the outcome.

use crate::clock::{Clock, MonotonicClock};
use crate::config::{Algorithm, LimiterConfig};
use crate::error::ConfigError;
use crate::telemetry::{EventSink, LimiterEvent, NullSink};
use std::borrow::Borrow;
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub mod middleware;
pub mod store;
pub mod strategies;
pub use middleware::{RateLimitLayer, RateLimitService};

use store::{lock_entry, StateStore};
use strategies::{AnyState, AnyStrategy, Strategy};

/// Why a request was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DenyReason {
    /// Not enough quota right now; retrying later can succeed.
    Exhausted,
    /// The cost is larger than the configured capacity and can never be admitted.
    ExceedsCapacity,
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenyReason::Exhausted => f.write_str("exhausted"),
            DenyReason::ExceedsCapacity => f.write_str("exceeds_capacity"),
        }
    }
}

/// The decision returned by a rate limiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// The request is allowed to proceed.
    Allowed {
        /// Whole units of quota left after this admission.
        /// Useful for `X-RateLimit-Remaining` headers.
        remaining: u32,
    },
    /// The request is denied.
    Denied {
        /// How long the caller should wait before retrying the same cost, or `None` when
        /// waiting cannot help. Useful for `Retry-After` headers.
        retry_after: Option<Duration>,
        /// Reason for denial.
        reason: DenyReason,
    },
}

impl Decision {
    /// Helper to check if allowed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }

    /// Remaining quota for an allowed decision.
    pub fn remaining(&self) -> Option<u32> {
        match self {
            Decision::Allowed { remaining } => Some(*remaining),
            Decision::Denied { .. } => None,
        }
    }

    /// Suggested wait for a denied decision.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Decision::Denied { retry_after, .. } => *retry_after,
            Decision::Allowed { .. } => None,
        }
    }

    pub(crate) fn allowed(remaining: f64) -> Self {
        // `as` saturates; floor keeps the count honest for fractional levels.
        Decision::Allowed {
            remaining: remaining.max(0.0).floor() as u32,
        }
    }

    pub(crate) fn exceeds_capacity() -> Self {
        Decision::Denied {
            retry_after: None,
            reason: DenyReason::ExceedsCapacity,
        }
    }
}

/// Per-identifier rate limiter.
///
/// Binds one strategy and its configuration to a concurrent state store. Safe to share
/// across threads (wrap in `Arc`); calls for different identifiers never wait on each
/// other.
///
/// # Examples
/// ```
/// use ratewarden::{LimiterConfig, ManualClock, RateLimiter};
/// use std::time::Duration;
///
/// let clock = ManualClock::new();
/// let limiter: RateLimiter<String> =
///     RateLimiter::new(LimiterConfig::token_bucket(5.0, 10).unwrap())
///         .unwrap()
///         .with_clock(clock.clone());
///
/// assert!((0..10).all(|_| limiter.allow("alice")));
/// assert!(!limiter.allow("alice"));
/// assert!(limiter.allow("bob"), "identifiers are independent");
///
/// clock.advance(Duration::from_secs(1));
/// assert!(limiter.allow_n("alice", 5));
/// ```
#[derive(Debug)]
pub struct RateLimiter<K>
where
    K: Eq + Hash,
{
    config: LimiterConfig,
    strategy: AnyStrategy,
    store: StateStore<K, AnyState>,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn EventSink>,
    decisions: AtomicU64,
}

impl<K> RateLimiter<K>
where
    K: Eq + Hash,
{
    /// Create a limiter, validating `config`.
    ///
    /// # Errors
    /// Returns [`ConfigError`] for a non-positive rate, capacity, window or eviction TTL.
    pub fn new(config: LimiterConfig) -> Result<Self, ConfigError> {
        let strategy = AnyStrategy::from_config(&config)?;
        tracing::info!(
            target: "ratewarden::rate_limit",
            algorithm = %config.algorithm(),
            rate = config.rate(),
            capacity = config.capacity(),
            window = ?config.window(),
            eviction_ttl = ?config.eviction_ttl(),
            "rate limiter created"
        );
        Ok(Self {
            config,
            strategy,
            store: StateStore::new(),
            clock: Arc::new(MonotonicClock::default()),
            sink: Arc::new(NullSink),
            decisions: AtomicU64::new(0),
        })
    }

    /// Override the clock (useful for deterministic tests).
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Send limiter events to `sink`.
    pub fn with_sink<S: EventSink + 'static>(mut self, sink: S) -> Self {
        self.sink = Arc::new(sink);
        self
    }

    /// Whether `id` currently has state.
    pub fn is_tracked<Q>(&self, id: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.store.contains(id)
    }

    /// Number of identifiers with live state.
    pub fn tracked(&self) -> usize {
        self.store.len()
    }

    /// Configuration this limiter was built from.
    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    /// Selected algorithm.
    pub fn algorithm(&self) -> Algorithm {
        self.strategy.algorithm()
    }
}

impl<K> RateLimiter<K>
where
    K: Eq + Hash + Clone,
{
    /// Admit one unit for `id` if quota allows, consuming it.
    pub fn allow<Q>(&self, id: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ToOwned<Owned = K> + fmt::Debug + ?Sized,
    {
        self.check(id, 1).is_allowed()
    }

    /// Admit `cost` units for `id` if quota allows, consuming them.
    pub fn allow_n<Q>(&self, id: &Q, cost: u32) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ToOwned<Owned = K> + fmt::Debug + ?Sized,
    {
        self.check(id, cost).is_allowed()
    }

    /// Would one unit be admitted for `id` right now? Consumes nothing.
    pub fn is_allowed<Q>(&self, id: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ToOwned<Owned = K> + fmt::Debug + ?Sized,
    {
        self.peek(id, 1).is_allowed()
    }

    /// Would `cost` units be admitted for `id` right now? Consumes nothing.
    pub fn is_allowed_n<Q>(&self, id: &Q, cost: u32) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ToOwned<Owned = K> + fmt::Debug + ?Sized,
    {
        self.peek(id, cost).is_allowed()
    }

    /// Full decision for `cost` units, consuming quota when allowed.
    ///
    /// Refill/leak/window bookkeeping, the capacity check, and consumption happen as one
    /// step under `id`'s lock.
    pub fn check<Q>(&self, id: &Q, cost: u32) -> Decision
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ToOwned<Owned = K> + fmt::Debug + ?Sized,
    {
        let decision = self.with_state(id, |strategy, state, now| {
            strategy.try_admit(state, cost, now)
        });
        self.record(id, cost, &decision);
        self.maybe_sweep();
        decision
    }

    /// Decision for `cost` units without consuming quota.
    ///
    /// Time-based bookkeeping (refill, leak, window roll, log pruning) is still brought up
    /// to date since it reflects real elapsed time. Calling `peek` repeatedly at a fixed
    /// time always returns the same decision.
    pub fn peek<Q>(&self, id: &Q, cost: u32) -> Decision
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ToOwned<Owned = K> + fmt::Debug + ?Sized,
    {
        self.with_state(id, |strategy, state, now| strategy.peek(state, cost, now))
    }

    /// Force `id` back to its initial state (full bucket, empty queue, empty window).
    pub fn reset<Q>(&self, id: &Q)
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ToOwned<Owned = K> + fmt::Debug + ?Sized,
    {
        match self.store.get(id) {
            Some(handle) => {
                let mut entry = lock_entry(&handle);
                let now = self.clock.now_millis();
                entry.state = self.strategy.initial_state(now);
                entry.touch(now);
                drop(entry);
                tracing::debug!(target: "ratewarden::rate_limit", identifier = ?id, "state reset");
                self.sink.emit(&LimiterEvent::Reset);
            }
            None => {
                tracing::debug!(
                    target: "ratewarden::rate_limit",
                    identifier = ?id,
                    "reset of untracked identifier; nothing to do"
                );
            }
        }
    }

    /// Remove identifiers idle longer than the configured eviction TTL.
    ///
    /// Runs automatically every `sweep_interval` decisions; hosts with their own timer can
    /// call it directly. Returns the number of identifiers removed.
    pub fn evict_idle(&self) -> usize {
        let now = self.clock.now_millis();
        let count = self.store.evict_idle(now, self.config.eviction_ttl());
        if count > 0 {
            tracing::debug!(target: "ratewarden::rate_limit", count, "evicted idle identifiers");
            self.sink.emit(&LimiterEvent::Evicted { count });
        }
        count
    }

    fn with_state<Q, F>(&self, id: &Q, f: F) -> Decision
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ToOwned<Owned = K> + fmt::Debug + ?Sized,
        F: FnOnce(&AnyStrategy, &mut AnyState, u64) -> Decision,
    {
        let created_at = self.clock.now_millis();
        let handle = self.store.get_or_create(id, created_at, || {
            tracing::debug!(
                target: "ratewarden::rate_limit",
                identifier = ?id,
                "tracking new identifier"
            );
            self.strategy.initial_state(created_at)
        });
        let mut entry = lock_entry(&handle);
        // Read the clock under the lock so time never runs backwards for one identifier.
        let now = self.clock.now_millis();
        entry.touch(now);
        f(&self.strategy, &mut entry.state, now)
    }

    fn record<Q>(&self, id: &Q, cost: u32, decision: &Decision)
    where
        Q: fmt::Debug + ?Sized,
    {
        match decision {
            Decision::Allowed { remaining } => {
                tracing::trace!(
                    target: "ratewarden::rate_limit",
                    identifier = ?id,
                    cost,
                    remaining,
                    "admitted"
                );
                self.sink.emit(&LimiterEvent::Admitted {
                    cost,
                    remaining: *remaining,
                });
            }
            Decision::Denied {
                retry_after,
                reason,
            } => {
                if *reason == DenyReason::ExceedsCapacity {
                    tracing::warn!(
                        target: "ratewarden::rate_limit",
                        identifier = ?id,
                        cost,
                        capacity = self.config.capacity(),
                        "cost exceeds capacity; request can never be admitted"
                    );
                } else {
                    tracing::trace!(
                        target: "ratewarden::rate_limit",
                        identifier = ?id,
                        cost,
                        retry_after = ?retry_after,
                        "rejected"
                    );
                }
                self.sink.emit(&LimiterEvent::Rejected {
                    cost,
                    reason: *reason,
                    retry_after: *retry_after,
                });
            }
        }
    }

    fn maybe_sweep(&self) {
        let every = self.config.sweep_interval();
        if every == 0 {
            return;
        }
        let n = self.decisions.fetch_add(1, Ordering::Relaxed) + 1;
        if n % every == 0 {
            self.evict_idle();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::telemetry::MemorySink;
    use std::sync::Mutex;
    use tracing_subscriber::fmt::writer::BoxMakeWriter;
    use tracing_subscriber::fmt::MakeWriter;

    fn limiter(config: LimiterConfig) -> (RateLimiter<String>, ManualClock) {
        let clock = ManualClock::new();
        let limiter = RateLimiter::new(config).unwrap().with_clock(clock.clone());
        (limiter, clock)
    }

    #[test]
    fn identifiers_are_isolated() {
        let (limiter, _) = limiter(LimiterConfig::token_bucket(1.0, 2).unwrap());
        assert!(limiter.allow_n("a", 2));
        assert!(!limiter.allow("a"));
        assert!(limiter.allow_n("b", 2));
        assert_eq!(limiter.tracked(), 2);
    }

    #[test]
    fn check_reports_remaining_and_retry_after() {
        let (limiter, _) = limiter(LimiterConfig::token_bucket(2.0, 3).unwrap());
        assert_eq!(limiter.check("a", 2), Decision::Allowed { remaining: 1 });
        let denied = limiter.check("a", 2);
        assert!(!denied.is_allowed());
        assert_eq!(denied.retry_after(), Some(Duration::from_millis(500)));
        assert_eq!(denied.remaining(), None);
    }

    #[test]
    fn is_allowed_does_not_consume() {
        let window = Duration::from_secs(1);
        let (limiter, _) = limiter(LimiterConfig::sliding_window(2, window).unwrap());
        for _ in 0..10 {
            assert!(limiter.is_allowed_n("a", 2));
        }
        assert!(limiter.allow_n("a", 2));
        assert!(!limiter.is_allowed("a"));
        assert!(!limiter.is_allowed("a"));
    }

    #[test]
    fn is_allowed_sees_elapsed_time() {
        let window = Duration::from_secs(1);
        let (limiter, clock) = limiter(LimiterConfig::fixed_window(1, window).unwrap());
        assert!(limiter.allow("a"));
        assert!(!limiter.is_allowed("a"));
        clock.advance(Duration::from_secs(1));
        assert!(limiter.is_allowed("a"));
    }

    #[test]
    fn reset_restores_full_capacity() {
        let (limiter, _) = limiter(LimiterConfig::leaky_bucket(1.0, 3).unwrap());
        assert!(limiter.allow_n("a", 3));
        assert!(!limiter.allow("a"));
        limiter.reset("a");
        assert!(limiter.allow_n("a", 3));
    }

    #[test]
    fn reset_of_unknown_identifier_is_a_no_op() {
        let sink = MemorySink::new();
        let (limiter, _) = limiter(LimiterConfig::token_bucket(1.0, 3).unwrap());
        let limiter = limiter.with_sink(sink.clone());
        limiter.reset("ghost");
        assert!(!limiter.is_tracked("ghost"));
        assert!(sink.is_empty(), "nothing was reset, so nothing is reported");
    }

    #[test]
    fn sweep_waits_for_the_full_interval() {
        let config = LimiterConfig::builder()
            .capacity(5)
            .eviction_ttl(Duration::from_secs(10))
            .sweep_interval(3)
            .build()
            .unwrap();
        let (limiter, clock) = limiter(config);
        assert!(limiter.allow("idle"));
        clock.advance(Duration::from_secs(11));
        assert!(limiter.allow("busy"));
        assert!(
            limiter.is_tracked("idle"),
            "two decisions do not trigger a sweep"
        );
        assert!(limiter.allow("busy"));
        assert!(!limiter.is_tracked("idle"));
    }

    #[test]
    fn accessors_work_without_clone_keys() {
        #[derive(Debug, PartialEq, Eq, Hash)]
        struct Opaque(u64);

        let config = LimiterConfig::leaky_bucket(1.0, 3).unwrap();
        let limiter: RateLimiter<Opaque> = RateLimiter::new(config).unwrap();
        assert_eq!(limiter.algorithm(), Algorithm::LeakyBucket);
        assert_eq!(limiter.config().capacity(), 3);
        assert_eq!(limiter.tracked(), 0);
        assert!(!limiter.is_tracked(&Opaque(1)));
    }

    #[test]
    fn rejects_invalid_config() {
        let err = LimiterConfig::token_bucket(0.0, 1).expect_err("invalid");
        assert!(matches!(err, ConfigError::InvalidRate { .. }));
    }

    #[test]
    fn automatic_sweep_runs_every_interval() {
        let config = LimiterConfig::builder()
            .capacity(5)
            .eviction_ttl(Duration::from_secs(10))
            .sweep_interval(2)
            .build()
            .unwrap();
        let (limiter, clock) = limiter(config);
        assert!(limiter.allow("idle"));
        clock.advance(Duration::from_secs(11));
        assert!(limiter.allow("busy"));
        assert!(
            !limiter.is_tracked("idle"),
            "second decision triggers the sweep"
        );
        assert!(limiter.is_tracked("busy"));
    }

    #[test]
    fn sweep_disabled_with_zero_interval() {
        let config = LimiterConfig::token_bucket(1.0, 5)
            .unwrap()
            .with_eviction_ttl(Duration::from_secs(1))
            .unwrap()
            .with_sweep_interval(0);
        let (limiter, clock) = limiter(config);
        assert!(limiter.allow("a"));
        clock.advance(Duration::from_secs(5));
        for _ in 0..2_000 {
            limiter.allow("b");
        }
        assert!(limiter.is_tracked("a"));
        assert_eq!(limiter.evict_idle(), 1);
    }

    #[test]
    fn events_are_emitted() {
        let sink = MemorySink::new();
        let (limiter, _) = limiter(LimiterConfig::token_bucket(1.0, 1).unwrap());
        let limiter = limiter.with_sink(sink.clone());

        assert!(limiter.allow("a"));
        assert!(!limiter.allow("a"));
        assert!(!limiter.allow_n("a", 2));
        limiter.reset("a");

        assert_eq!(
            sink.events(),
            vec![
                LimiterEvent::Admitted {
                    cost: 1,
                    remaining: 0,
                },
                LimiterEvent::Rejected {
                    cost: 1,
                    reason: DenyReason::Exhausted,
                    retry_after: Some(Duration::from_secs(1)),
                },
                LimiterEvent::Rejected {
                    cost: 2,
                    reason: DenyReason::ExceedsCapacity,
                    retry_after: None,
                },
                LimiterEvent::Reset,
            ]
        );
    }

    #[test]
    fn peek_emits_nothing() {
        let sink = MemorySink::new();
        let (limiter, _) = limiter(LimiterConfig::token_bucket(1.0, 1).unwrap());
        let limiter = limiter.with_sink(sink.clone());
        assert!(limiter.is_allowed("a"));
        assert!(sink.is_empty());
    }

    #[derive(Clone)]
    struct SharedWriter(Arc<Mutex<Vec<u8>>>);

    impl<'a> MakeWriter<'a> for SharedWriter {
        type Writer = SharedGuard;
        fn make_writer(&'a self) -> Self::Writer {
            SharedGuard(self.0.clone())
        }
    }

    struct SharedGuard(Arc<Mutex<Vec<u8>>>);
    impl std::io::Write for SharedGuard {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            let mut guard = self.0.lock().unwrap();
            guard.extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn oversized_cost_logs_a_warning() {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let writer = SharedWriter(buffer.clone());
        let subscriber = tracing_subscriber::fmt()
            .with_writer(BoxMakeWriter::new(writer))
            .with_target(true)
            .without_time()
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let (limiter, _) = limiter(LimiterConfig::token_bucket(1.0, 2).unwrap());
        assert!(!limiter.allow_n("api-key-7", 3));

        let logs = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
        assert!(
            logs.contains("cost exceeds capacity"),
            "warning should be emitted: {logs}"
        );
        assert!(logs.contains("api-key-7"));
    }
}
