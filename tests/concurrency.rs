use ratewarden::{LimiterConfig, ManualClock, RateLimiter};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

const THREADS: usize = 16;
const CALLS_PER_THREAD: usize = 50;

fn shared(config: LimiterConfig) -> (Arc<RateLimiter<String>>, ManualClock) {
    let clock = ManualClock::new();
    let limiter = RateLimiter::new(config).unwrap().with_clock(clock.clone());
    (Arc::new(limiter), clock)
}

fn hammer(
    limiter: &Arc<RateLimiter<String>>,
    id: impl Fn(usize) -> String + Send + Sync + 'static,
) -> usize {
    let barrier = Arc::new(Barrier::new(THREADS));
    let accepted = Arc::new(AtomicUsize::new(0));
    let id = Arc::new(id);

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let limiter = limiter.clone();
            let barrier = barrier.clone();
            let accepted = accepted.clone();
            let id = id.clone();
            thread::spawn(move || {
                let key = id(t);
                barrier.wait();
                for _ in 0..CALLS_PER_THREAD {
                    if limiter.allow(key.as_str()) {
                        accepted.fetch_add(1, Ordering::Relaxed);
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("worker panicked");
    }
    accepted.load(Ordering::Relaxed)
}

#[test]
fn same_identifier_admits_exactly_capacity() {
    for config in [
        LimiterConfig::token_bucket(1.0, 100).unwrap(),
        LimiterConfig::leaky_bucket(1.0, 100).unwrap(),
        LimiterConfig::fixed_window(100, Duration::from_secs(1)).unwrap(),
        LimiterConfig::sliding_window(100, Duration::from_secs(1)).unwrap(),
    ] {
        let algorithm = config.algorithm();
        let (limiter, _clock) = shared(config);
        let accepted = hammer(&limiter, |_| "shared".to_string());
        assert_eq!(accepted, 100, "{algorithm} over-admitted or lost updates");
        assert_eq!(limiter.tracked(), 1);
    }
}

#[test]
fn distinct_identifiers_do_not_interfere() {
    let (limiter, _clock) = shared(LimiterConfig::token_bucket(1.0, 10).unwrap());
    let accepted = hammer(&limiter, |t| format!("client-{t}"));
    assert_eq!(accepted, THREADS * 10);
    assert_eq!(limiter.tracked(), THREADS);
}

#[test]
fn eviction_races_with_decisions() {
    let config = LimiterConfig::token_bucket(1_000.0, 1_000)
        .unwrap()
        .with_eviction_ttl(Duration::from_millis(1))
        .unwrap()
        .with_sweep_interval(0);
    let (limiter, clock) = shared(config);

    let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let sweeper = {
        let limiter = limiter.clone();
        let clock = clock.clone();
        let stop = stop.clone();
        thread::spawn(move || {
            let mut removed = 0;
            while !stop.load(Ordering::Relaxed) {
                clock.advance_millis(5);
                removed += limiter.evict_idle();
                thread::yield_now();
            }
            removed
        })
    };

    let accepted = hammer(&limiter, |t| format!("client-{}", t % 4));
    stop.store(true, Ordering::Relaxed);
    let _removed = sweeper.join().expect("sweeper panicked");

    // Eviction may reset idle identifiers but never blocks or corrupts a decision.
    assert!(accepted > 0);
    assert!(limiter.tracked() <= 4);
}
