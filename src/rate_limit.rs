//! Rate limiting (C5/C11 ambient stack). Two independent governor quotas
//! share the same primitive:
//!
//! - `create_rate_limiter` throttles inbound Control API requests per
//!   minute, applied as `axum::middleware::from_fn` ahead of `auth`.
//! - `create_trade_submission_limiter` caps MEXC order-submission attempts
//!   per hour as an in-process defense-in-depth layer above the DB-backed
//!   `SafetyChecker` count: a process restart resets this limiter while the
//!   DB-backed hourly count survives, so the two intentionally disagree
//!   after a restart rather than double-count.

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

pub type GlobalRateLimiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>;

/// Control API request-throttle configuration
pub struct RateLimiterConfig {
    /// Maximum Control API requests per minute
    pub requests_per_minute: u32,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self { requests_per_minute: 100 }
    }
}

/// Create the Control API's per-minute request limiter
pub fn create_rate_limiter(config: RateLimiterConfig) -> GlobalRateLimiter {
    let quota = Quota::per_minute(NonZeroU32::new(config.requests_per_minute).expect("requests_per_minute must be non-zero"));
    Arc::new(RateLimiter::direct(quota))
}

/// `axum::middleware::from_fn` layer applying a shared `GlobalRateLimiter`
/// to every request it wraps.
pub async fn rate_limit_middleware(limiter: GlobalRateLimiter, request: Request, next: Next) -> Response {
    match limiter.check() {
        Ok(_) => next.run(request).await,
        Err(_) => {
            tracing::warn!("control API rate limit exceeded");
            (StatusCode::TOO_MANY_REQUESTS, "rate limit exceeded, try again later").into_response()
        }
    }
}

/// §9 defense-in-depth: caps MEXC order submissions at `max_trades_per_hour`
/// (`TradingConfiguration::max_trades_per_hour`) independently of the
/// DB-backed `SafetyChecker` count, so a bug in the DB query path can't by
/// itself blow through the configured hourly cap.
pub fn create_trade_submission_limiter(max_trades_per_hour: u32) -> GlobalRateLimiter {
    let quota = Quota::per_hour(NonZeroU32::new(max_trades_per_hour.max(1)).expect("non-zero by construction"));
    Arc::new(RateLimiter::direct(quota))
}
