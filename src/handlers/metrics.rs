use std::sync::Arc;

use axum::extract::State;
use prometheus::TextEncoder;

use crate::error::AppError;
use crate::metrics::ACTIVE_ENTRIES;
use crate::state::AppState;

pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> Result<String, AppError> {
    ACTIVE_ENTRIES.set(state.rate_limiter.len() as f64);

    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    Ok(encoder.encode_to_string(&metric_families)?)
}
