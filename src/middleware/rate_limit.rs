use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{clock::DefaultClock, state::InMemoryState, state::NotKeyed, Quota, RateLimiter};
use std::sync::Arc;
use tracing::warn;

use crate::config::RateLimit;

#[derive(Clone)]
pub struct RateLimitLayer {
    limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

impl RateLimitLayer {
    /// Allow `rate.limit` requests per `rate.period`, all of them usable as a burst.
    pub fn new(rate: RateLimit) -> Self {
        let quota = Quota::with_period(rate.period / rate.limit.get())
            .map(|q| q.allow_burst(rate.limit))
            .unwrap_or_else(|| Quota::per_second(rate.limit));

        RateLimitLayer {
            limiter: Arc::new(RateLimiter::direct(quota)),
        }
    }

    pub fn check(&self) -> Result<(), Response> {
        match self.limiter.check() {
            Ok(_) => Ok(()),
            Err(_) => {
                warn!("rate limit exceeded");
                let response = (
                    StatusCode::TOO_MANY_REQUESTS,
                    "Rate limit exceeded. Please try again later.",
                );
                Err(response.into_response())
            }
        }
    }
}

pub async fn rate_limit_middleware(
    State(rate_limit): State<RateLimitLayer>,
    req: Request,
    next: Next,
) -> Result<impl IntoResponse, Response> {
    rate_limit.check()?;
    Ok(next.run(req).await)
}
