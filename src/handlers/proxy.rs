use std::sync::Arc;

use axum::{
    extract::{Request, State},
    response::Response,
};

use crate::error::AppError;
use crate::state::AppState;

// Reached only after the route's rate limit admitted the request
pub async fn proxy_handler(
    State(state): State<Arc<AppState>>,
    req: Request,
) -> Result<Response, AppError> {
    state.upstream.forward(req).await
}
