//! Fixed-window rate limiting decorator.
//!
//! # Keying
//!
//! Authenticated requests are counted per user id, anonymous ones per client
//! address (see [`Identity::rate_limit_key`](crate::models::Identity::rate_limit_key)).
//!
//! # Response Headers
//!
//! Allowed replies carry:
//! - `X-RateLimit-Limit`: configured maximum per window
//! - `X-RateLimit-Remaining`: requests left in the current window
//!
//! On rate limit exceeded the layer raises a `rate_limit_exceeded` fault; the
//! exception boundary renders it as 429 with `Retry-After`,
//! `X-RateLimit-Limit` and `X-RateLimit-Remaining: 0`.
//!
//! Rejected requests still count toward the window, so a client hammering a
//! limited endpoint does not get a fresh allowance mid-window.

use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::http::HeaderValue;
use tower::{Layer, Service};
use tracing::{debug, warn};

use super::LayerFuture;
use crate::error::{ApiException, Fault};
use crate::limiter::{Decision, Quota, RateLimitError, RateLimitStore};
use crate::metrics;
use crate::models::{ApiReply, RequestContext};

/// Build a rate limiting decorator with its own store.
///
/// # Errors
///
/// Returns [`RateLimitError`] if `max_requests` or `window_secs` is zero.
pub fn rate_limit(max_requests: u32, window_secs: u64) -> Result<RateLimitLayer, RateLimitError> {
    RateLimitLayer::new(max_requests, Duration::from_secs(window_secs))
}

/// Rate limiting layer for the request pipeline.
///
/// # Example
///
/// ```rust,ignore
/// let layer = RateLimitLayer::new(100, Duration::from_secs(3600))?; // 100 per hour
/// let pipeline = Pipeline::new("create_booking").rate_limit(layer);
/// ```
#[derive(Debug, Clone)]
pub struct RateLimitLayer {
    store: Arc<RateLimitStore>,
    quota: Quota,
}

impl RateLimitLayer {
    /// Create a layer backed by a fresh in-memory store.
    ///
    /// # Errors
    ///
    /// Returns [`RateLimitError`] if either value is zero.
    pub fn new(max_requests: u32, window: Duration) -> Result<Self, RateLimitError> {
        Self::with_store(Arc::new(RateLimitStore::new()), max_requests, window)
    }

    /// Create a layer that counts in `store`, which may be shared with other
    /// layers so they draw from one allowance.
    ///
    /// # Errors
    ///
    /// Returns [`RateLimitError`] if either value is zero.
    pub fn with_store(
        store: Arc<RateLimitStore>,
        max_requests: u32,
        window: Duration,
    ) -> Result<Self, RateLimitError> {
        let quota = Quota::new(max_requests, window)?;
        Ok(Self { store, quota })
    }

    pub fn store(&self) -> &Arc<RateLimitStore> {
        &self.store
    }

    pub fn quota(&self) -> Quota {
        self.quota
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            store: self.store.clone(),
            quota: self.quota,
        }
    }
}

/// Rate limiting service wrapper.
#[derive(Debug, Clone)]
pub struct RateLimitService<S> {
    inner: S,
    store: Arc<RateLimitStore>,
    quota: Quota,
}

impl<S> Service<RequestContext> for RateLimitService<S>
where
    S: Service<RequestContext, Response = ApiReply, Error = Fault> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = ApiReply;
    type Error = Fault;
    type Future = LayerFuture<Result<ApiReply, Fault>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, ctx: RequestContext) -> Self::Future {
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let limit = self.quota.max_requests();

        let key = ctx.identity.rate_limit_key();
        let decision = self.store.check_and_increment(&key, &self.quota);

        Box::pin(async move {
            match decision {
                Decision::Denied { count, retry_after } => {
                    warn!(
                        request_id = %ctx.request_id,
                        key = %key,
                        path = %ctx.path,
                        count,
                        limit,
                        retry_after_secs = retry_after.as_secs(),
                        "Rate limit exceeded"
                    );
                    metrics::record_rate_limit_rejection();
                    Err(ApiException::rate_limited(limit, retry_after).into())
                }
                Decision::Allowed { count, remaining } => {
                    debug!(key = %key, count, remaining, "Rate limit check passed");
                    let mut reply = inner.call(ctx).await?;
                    reply
                        .headers
                        .insert("x-ratelimit-limit", HeaderValue::from(limit));
                    reply
                        .headers
                        .insert("x-ratelimit-remaining", HeaderValue::from(remaining));
                    Ok(reply)
                }
            }
        })
    }
}
