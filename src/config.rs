//! Limiter configuration and validation.

use crate::error::ConfigError;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Default idle time after which per-identifier state is reclaimed.
pub const DEFAULT_EVICTION_TTL: Duration = Duration::from_secs(300);
/// Default number of decisions between opportunistic eviction sweeps.
pub const DEFAULT_SWEEP_INTERVAL: u64 = 1024;

/// Limiting strategy selected once at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Algorithm {
    /// Bursts up to `capacity`, refilled continuously at `rate`.
    #[default]
    TokenBucket,
    /// A level that fills per request and drains at `rate`.
    LeakyBucket,
    /// At most `capacity` units per aligned window.
    FixedWindow,
    /// At most `capacity` units in any trailing window.
    SlidingWindow,
}

impl Algorithm {
    /// Snake-case name used in configuration files.
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::TokenBucket => "token_bucket",
            Algorithm::LeakyBucket => "leaky_bucket",
            Algorithm::FixedWindow => "fixed_window",
            Algorithm::SlidingWindow => "sliding_window",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "token_bucket" => Ok(Algorithm::TokenBucket),
            "leaky_bucket" => Ok(Algorithm::LeakyBucket),
            "fixed_window" => Ok(Algorithm::FixedWindow),
            "sliding_window" => Ok(Algorithm::SlidingWindow),
            _ => Err(ConfigError::UnknownAlgorithm(s.to_string())),
        }
    }
}

/// Validated, immutable limiter configuration.
///
/// Every parameter is validated regardless of the chosen algorithm, so a config stays
/// valid if the algorithm is later switched.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LimiterConfig {
    algorithm: Algorithm,
    rate: f64,
    capacity: u32,
    window: Duration,
    eviction_ttl: Duration,
    sweep_interval: u64,
}

impl LimiterConfig {
    /// Start a builder with default values.
    pub fn builder() -> LimiterConfigBuilder {
        LimiterConfigBuilder::default()
    }

    /// Token bucket refilling `rate` tokens/second up to `capacity`.
    ///
    /// # Examples
    /// ```
    /// use ratewarden::LimiterConfig;
    /// let cfg = LimiterConfig::token_bucket(5.0, 10).unwrap();
    /// assert_eq!(cfg.capacity(), 10);
    /// assert!(LimiterConfig::token_bucket(0.0, 10).is_err());
    /// ```
    pub fn token_bucket(rate: f64, capacity: u32) -> Result<Self, ConfigError> {
        Self::builder()
            .algorithm(Algorithm::TokenBucket)
            .rate(rate)
            .capacity(capacity)
            .build()
    }

    /// Leaky bucket of size `capacity` draining at `rate` units/second.
    pub fn leaky_bucket(rate: f64, capacity: u32) -> Result<Self, ConfigError> {
        Self::builder()
            .algorithm(Algorithm::LeakyBucket)
            .rate(rate)
            .capacity(capacity)
            .build()
    }

    /// At most `capacity` units per aligned `window`.
    pub fn fixed_window(capacity: u32, window: Duration) -> Result<Self, ConfigError> {
        Self::builder()
            .algorithm(Algorithm::FixedWindow)
            .capacity(capacity)
            .window(window)
            .rate(per_second(capacity, window))
            .build()
    }

    /// At most `capacity` units within any trailing `window`.
    pub fn sliding_window(capacity: u32, window: Duration) -> Result<Self, ConfigError> {
        Self::builder()
            .algorithm(Algorithm::SlidingWindow)
            .capacity(capacity)
            .window(window)
            .rate(per_second(capacity, window))
            .build()
    }

    /// Copy of this config with a different idle TTL.
    pub fn with_eviction_ttl(mut self, ttl: Duration) -> Result<Self, ConfigError> {
        self.eviction_ttl = ttl;
        self.validate()?;
        Ok(self)
    }

    /// Copy of this config with a different sweep interval (0 disables automatic sweeps).
    ///
    /// A sweep runs on the thread of the decision that triggers it, visits every tracked
    /// identifier, and write-locks each map shard in turn. That one call costs
    /// O(tracked identifiers) and briefly delays lookups on the shard being swept. With
    /// many identifiers, raise the interval or pass 0 and call
    /// [`RateLimiter::evict_idle`](crate::RateLimiter::evict_idle) from a background timer.
    pub fn with_sweep_interval(mut self, every: u64) -> Self {
        self.sweep_interval = every;
        self
    }

    /// Check every field; used by the builder and again by the limiter for configs that
    /// did not come through the builder (e.g. deserialized ones).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.rate.is_finite() || self.rate <= 0.0 {
            return Err(ConfigError::InvalidRate {
                provided: self.rate,
            });
        }
        if self.capacity == 0 {
            return Err(ConfigError::InvalidCapacity {
                provided: self.capacity,
            });
        }
        if self.window < Duration::from_millis(1) {
            return Err(ConfigError::InvalidWindow(self.window));
        }
        if self.eviction_ttl.is_zero() {
            return Err(ConfigError::InvalidEvictionTtl(self.eviction_ttl));
        }
        Ok(())
    }

    /// Selected strategy.
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Refill/leak rate in units per second.
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Bucket size, or max units per window.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Window length for the window strategies.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Idle time after which an identifier's state is reclaimed.
    pub fn eviction_ttl(&self) -> Duration {
        self.eviction_ttl
    }

    /// Decisions between automatic eviction sweeps; 0 means never.
    pub fn sweep_interval(&self) -> u64 {
        self.sweep_interval
    }
}

fn per_second(capacity: u32, window: Duration) -> f64 {
    let secs = window.as_secs_f64();
    if secs > 0.0 {
        f64::from(capacity) / secs
    } else {
        f64::from(capacity)
    }
}

/// Builder for [`LimiterConfig`].
#[derive(Debug, Clone)]
pub struct LimiterConfigBuilder {
    config: LimiterConfig,
}

impl Default for LimiterConfigBuilder {
    fn default() -> Self {
        Self {
            config: LimiterConfig {
                algorithm: Algorithm::TokenBucket,
                rate: 10.0,
                capacity: 10,
                window: Duration::from_secs(1),
                eviction_ttl: DEFAULT_EVICTION_TTL,
                sweep_interval: DEFAULT_SWEEP_INTERVAL,
            },
        }
    }
}

impl LimiterConfigBuilder {
    /// Strategy to use.
    pub fn algorithm(mut self, algorithm: Algorithm) -> Self {
        self.config.algorithm = algorithm;
        self
    }

    /// Refill/leak rate (units per second).
    pub fn rate(mut self, rate: f64) -> Self {
        self.config.rate = rate;
        self
    }

    /// Bucket size or max units per window.
    pub fn capacity(mut self, capacity: u32) -> Self {
        self.config.capacity = capacity;
        self
    }

    /// Window length.
    pub fn window(mut self, window: Duration) -> Self {
        self.config.window = window;
        self
    }

    /// Idle time after which state is reclaimed.
    pub fn eviction_ttl(mut self, ttl: Duration) -> Self {
        self.config.eviction_ttl = ttl;
        self
    }

    /// Decisions between automatic sweeps; 0 disables them.
    ///
    /// See [`LimiterConfig::with_sweep_interval`] for the cost of each sweep.
    pub fn sweep_interval(mut self, every: u64) -> Self {
        self.config.sweep_interval = every;
        self
    }

    /// Validate and produce the config.
    pub fn build(self) -> Result<LimiterConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
