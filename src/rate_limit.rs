use axum::{
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Quota applied to the whole HTTP surface
pub struct ApiQuota {
    pub requests_per_minute: u32,
}

impl Default for ApiQuota {
    fn default() -> Self {
        Self {
            requests_per_minute: 100,
        }
    }
}

impl ApiQuota {
    /// Read `REQUESTS_PER_MINUTE` from the environment, keeping the
    /// default for missing or unparseable values.
    pub fn from_env() -> Self {
        let mut quota = ApiQuota::default();
        if let Ok(raw) = std::env::var("REQUESTS_PER_MINUTE") {
            match raw.parse::<u32>() {
                Ok(value) if value > 0 => quota.requests_per_minute = value,
                _ => tracing::warn!(
                    "Invalid REQUESTS_PER_MINUTE '{}', using default {}",
                    raw,
                    quota.requests_per_minute
                ),
            }
        }
        quota
    }
}

/// Shared limiter handle for the HTTP surface
pub type RequestLimiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>;

pub fn build_limiter(quota: &ApiQuota) -> RequestLimiter {
    let per_minute = NonZeroU32::new(quota.requests_per_minute)
        .expect("requests per minute must be non-zero");
    Arc::new(RateLimiter::direct(Quota::per_minute(per_minute)))
}

/// Middleware rejecting requests beyond the configured quota.
pub async fn throttle_requests(
    limiter: RequestLimiter,
    request: Request,
    next: Next,
) -> Response {
    match limiter.check() {
        Ok(_) => next.run(request).await,
        Err(_) => {
            tracing::warn!("Request rejected: global rate limit exceeded");
            (
                StatusCode::TOO_MANY_REQUESTS,
                "Rate limit exceeded. Please try again later.",
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limiter_allows_within_quota() {
        let limiter = build_limiter(&ApiQuota {
            requests_per_minute: 2,
        });
        assert!(limiter.check().is_ok());
        assert!(limiter.check().is_ok());
        assert!(limiter.check().is_err());
    }

    #[test]
    fn test_default_quota() {
        assert_eq!(ApiQuota::default().requests_per_minute, 100);
    }
}
