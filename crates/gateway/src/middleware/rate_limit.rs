//! Rate limiting middleware using token bucket algorithm

use askforge_common::errors::{AppError, Result};
use axum::{
    extract::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{
    clock::QuantaClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Process-wide rate limiter
pub type GlobalRateLimiter = RateLimiter<NotKeyed, InMemoryState, QuantaClock>;

/// Shared limiter plus the configured rate, reported on rejection
#[derive(Clone)]
pub struct RateLimit {
    limiter: Arc<GlobalRateLimiter>,
    requests_per_second: u32,
}

impl RateLimit {
    pub fn new(requests_per_second: u32, burst: u32) -> Result<Self> {
        let rate = NonZeroU32::new(requests_per_second).ok_or_else(|| AppError::Configuration {
            message: "rate_limit.requests_per_second must be positive".to_string(),
        })?;
        let burst = NonZeroU32::new(burst).ok_or_else(|| AppError::Configuration {
            message: "rate_limit.burst must be positive".to_string(),
        })?;

        Ok(Self {
            limiter: Arc::new(RateLimiter::direct(Quota::per_second(rate).allow_burst(burst))),
            requests_per_second,
        })
    }

    pub fn check(&self) -> bool {
        self.limiter.check().is_ok()
    }
}

/// Rate limiting middleware
pub async fn rate_limit_middleware(limit: RateLimit, request: Request, next: Next) -> Response {
    if limit.check() {
        return next.run(request).await;
    }

    tracing::warn!(path = %request.uri().path(), "Rate limit exceeded");
    AppError::RateLimited {
        limit: limit.requests_per_second,
    }
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limiter_creation() {
        let limit = tokio_test::assert_ok!(RateLimit::new(100, 200));
        assert!(limit.check());
    }

    #[test]
    fn test_burst_exhaustion() {
        let limit = RateLimit::new(1, 2).unwrap();
        assert!(limit.check());
        assert!(limit.check());
        assert!(!limit.check());
    }

    #[test]
    fn test_zero_quota_rejected() {
        assert!(RateLimit::new(0, 10).is_err());
        assert!(RateLimit::new(10, 0).is_err());
    }
}
