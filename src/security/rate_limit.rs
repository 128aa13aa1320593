use std::num::NonZeroU32;
use std::time::Duration;

use axum::{
    Json,
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde_json::json;

use crate::AppState;

/// Slowest refill rate; lower configured rates are clamped to it.
const SLOWEST_PERIOD: Duration = Duration::from_secs(3600);

/// Global token bucket shared by every route.
///
/// Not keyed by client address; one bucket throttles the whole gateway.
pub struct AppRateLimiter {
    limiter: DefaultDirectRateLimiter,
}

impl std::fmt::Debug for AppRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppRateLimiter").finish_non_exhaustive()
    }
}

impl AppRateLimiter {
    pub fn new(requests_per_second: f32, burst_size: u32) -> Self {
        let burst = NonZeroU32::new(burst_size).unwrap_or(NonZeroU32::MIN);
        let quota = if requests_per_second.is_finite() && requests_per_second > 0.0 {
            let period = Duration::try_from_secs_f64(1.0 / f64::from(requests_per_second))
                .map_or(SLOWEST_PERIOD, |p| p.min(SLOWEST_PERIOD));
            Quota::with_period(period).unwrap_or_else(|| Quota::per_second(NonZeroU32::MAX))
        } else {
            Quota::per_second(NonZeroU32::MIN)
        };

        Self {
            limiter: RateLimiter::direct(quota.allow_burst(burst)),
        }
    }

    /// Take one token; `false` when the bucket is empty.
    pub fn check(&self) -> bool {
        self.limiter.check().is_ok()
    }
}

/// Middleware to enforce rate limits
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    if state.config.resilience.rate_limit_enabled && !state.rate_limiter.check() {
        tracing::warn!(path = %req.uri().path(), "Request rejected by rate limiter");
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({ "error": "too many requests" })),
        )
            .into_response();
    }
    next.run(req).await
}
