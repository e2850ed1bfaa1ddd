//! Tower integration.

use crate::error::LimitError;
use crate::rate_limit::{Decision, RateLimiter};
use futures::future::{self, BoxFuture, FutureExt};
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower_layer::Layer;
use tower_service::Service;

/// A layer that enforces a [`RateLimiter`] in front of a service.
///
/// `extract` maps each request to its identifier and cost. Admitted requests go to the
/// inner service; denied ones complete immediately with [`LimitError::RateLimited`].
///
/// ```
/// use ratewarden::{LimiterConfig, RateLimitLayer, RateLimiter};
/// use std::sync::Arc;
///
/// let limiter: Arc<RateLimiter<String>> =
///     Arc::new(RateLimiter::new(LimiterConfig::token_bucket(10.0, 20).unwrap()).unwrap());
/// let layer = RateLimitLayer::new(limiter, |req: &(String, u32)| (req.0.clone(), req.1));
/// # let _ = layer;
/// ```
pub struct RateLimitLayer<K, F>
where
    K: Eq + Hash,
{
    limiter: Arc<RateLimiter<K>>,
    extract: Arc<F>,
}

impl<K, F> RateLimitLayer<K, F>
where
    K: Eq + Hash,
{
    /// Create a new rate limit layer.
    pub fn new(limiter: Arc<RateLimiter<K>>, extract: F) -> Self {
        Self {
            limiter,
            extract: Arc::new(extract),
        }
    }
}

impl<K, F> Clone for RateLimitLayer<K, F>
where
    K: Eq + Hash,
{
    fn clone(&self) -> Self {
        Self {
            limiter: self.limiter.clone(),
            extract: self.extract.clone(),
        }
    }
}

impl<K, F> fmt::Debug for RateLimitLayer<K, F>
where
    K: Eq + Hash,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitLayer")
            .field("algorithm", &self.limiter.algorithm())
            .finish()
    }
}

impl<S, K, F> Layer<S> for RateLimitLayer<K, F>
where
    K: Eq + Hash,
{
    type Service = RateLimitService<S, K, F>;

    fn layer(&self, service: S) -> Self::Service {
        RateLimitService {
            inner: service,
            limiter: self.limiter.clone(),
            extract: self.extract.clone(),
        }
    }
}

/// Middleware service that enforces rate limits.
pub struct RateLimitService<S, K, F>
where
    K: Eq + Hash,
{
    inner: S,
    limiter: Arc<RateLimiter<K>>,
    extract: Arc<F>,
}

impl<S: Clone, K, F> Clone for RateLimitService<S, K, F>
where
    K: Eq + Hash,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            limiter: self.limiter.clone(),
            extract: self.extract.clone(),
        }
    }
}

impl<S: fmt::Debug, K, F> fmt::Debug for RateLimitService<S, K, F>
where
    K: Eq + Hash,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitService")
            .field("inner", &self.inner)
            .field("algorithm", &self.limiter.algorithm())
            .finish()
    }
}

impl<S, K, F, Req> Service<Req> for RateLimitService<S, K, F>
where
    S: Service<Req>,
    S::Future: Send + 'static,
    S::Response: Send + 'static,
    S::Error: Send + 'static,
    K: Eq + Hash + Clone + fmt::Debug,
    F: Fn(&Req) -> (K, u32),
{
    type Response = S::Response;
    type Error = LimitError<S::Error>;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(LimitError::Inner)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let (key, cost) = (self.extract)(&req);
        match self.limiter.check(&key, cost) {
            Decision::Allowed { .. } => self
                .inner
                .call(req)
                .map(|res| res.map_err(LimitError::Inner))
                .boxed(),
            Decision::Denied {
                retry_after,
                reason,
            } => {
                let rejected = LimitError::RateLimited {
                    retry_after,
                    reason,
                };
                future::ready(Err(rejected)).boxed()
            }
        }
    }
}
