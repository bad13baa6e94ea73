use lazy_static::lazy_static;
use prometheus::{
    Counter, Gauge, Histogram, IntCounterVec, register_counter, register_gauge,
    register_histogram, register_int_counter_vec,
};


lazy_static! {
    pub static ref REQUEST_TOTAL: Counter =
        register_counter!("nervi_guard_requests_total", "Total number of guarded requests").unwrap();
    pub static ref RATE_LIMITED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "nervi_guard_rate_limited_total",
        "Requests denied by the rate limiter",
        &["endpoint"]
    )
    .unwrap();
    pub static ref UPSTREAM_ERRORS: Counter =
        register_counter!("nervi_guard_upstream_errors_total", "Failed upstream calls").unwrap();
    pub static ref UPSTREAM_LATENCY: Histogram = register_histogram!(
        "nervi_guard_upstream_latency_seconds",
        "Upstream latency in seconds"
    )
    .unwrap();
    pub static ref ACTIVE_ENTRIES: Gauge =
        register_gauge!("nervi_guard_rate_limit_entries", "Live rate limit entries after the last sweep").unwrap();
}
