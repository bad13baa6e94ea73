use std::sync::Arc;

use axum::{
    Json,
    extract::{Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::SecondsFormat;
use tracing::warn;

use crate::client::{client_identifier, mask_identifier};
use crate::metrics::{RATE_LIMITED_TOTAL, REQUEST_TOTAL};
use crate::models::RateLimitedBody;
use crate::presets::Preset;
use crate::rate_limit::{RateLimitDecision, RateLimiter};

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

pub const RATE_LIMITED_MESSAGE: &str = "Too many requests. Please try again later.";

/// Middleware state: which limiter, and which preset this route uses.
#[derive(Clone)]
pub struct Guard {
    pub limiter: Arc<RateLimiter>,
    pub preset: Preset,
}

impl Guard {
    pub fn new(limiter: Arc<RateLimiter>, preset: Preset) -> Self {
        Self { limiter, preset }
    }
}

/// 429 response for a denied request.
#[derive(Debug)]
pub struct RateLimited(pub RateLimitDecision);

impl IntoResponse for RateLimited {
    fn into_response(self) -> Response {
        let decision = self.0;
        let retry_after = decision.retry_after_secs();

        let body = RateLimitedBody {
            error: RATE_LIMITED_MESSAGE.to_string(),
            retry_after,
        };
        let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();

        let headers = response.headers_mut();
        headers.insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
        headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
        headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(0u32));
        let reset = decision
            .reset_at_utc()
            .to_rfc3339_opts(SecondsFormat::Millis, true);
        if let Ok(value) = HeaderValue::from_str(&reset) {
            headers.insert(X_RATELIMIT_RESET, value);
        }

        response
    }
}

fn set_limit_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
}

// Rate limit check in front of a route; denied requests never reach `next`
pub async fn rate_limit_middleware(
    State(guard): State<Guard>,
    req: Request,
    next: Next,
) -> Response {
    REQUEST_TOTAL.inc();

    let identifier = client_identifier(req.headers());
    let decision = guard.limiter.check_preset(&identifier, guard.preset);

    if !decision.allowed {
        RATE_LIMITED_TOTAL
            .with_label_values(&[guard.preset.name()])
            .inc();
        warn!(
            target: "security",
            event = "rate_limit_exceeded",
            endpoint = %guard.preset,
            client = %mask_identifier(&identifier),
            retry_after = decision.retry_after_secs(),
            "Rate limit exceeded"
        );
        return RateLimited(decision).into_response();
    }

    let mut response = next.run(req).await;
    set_limit_headers(response.headers_mut(), &decision);
    response
}
