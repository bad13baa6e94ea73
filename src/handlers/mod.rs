mod guard;
mod health;
mod metrics;
mod proxy;

pub use guard::{
    Guard, RATE_LIMITED_MESSAGE, RateLimited, X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING,
    X_RATELIMIT_RESET, rate_limit_middleware,
};
pub use health::health_handler;
pub use metrics::metrics_handler;
pub use proxy::proxy_handler;
