use std::sync::Arc;

use crate::rate_limit::RateLimiter;
use crate::upstream::Upstream;

// app's shared state
pub struct AppState {
    pub rate_limiter: Arc<RateLimiter>,
    pub upstream: Upstream,
}

impl AppState {
    pub fn new(rate_limiter: Arc<RateLimiter>, upstream: Upstream) -> Self {
        Self {
            rate_limiter,
            upstream,
        }
    }
}
