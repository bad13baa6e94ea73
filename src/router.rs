use std::sync::Arc;

use axum::{
    Router, middleware,
    routing::{any, get},
};

use crate::handlers::{Guard, health_handler, metrics_handler, proxy_handler, rate_limit_middleware};
use crate::presets::Preset;
use crate::state::AppState;

// Routes forwarded to the Nervi app, by the preset guarding them.
// Anything else under /api falls through to the general `api` preset.
const GUARDED_ROUTES: [(Preset, &[&str]); 4] = [
    (Preset::Strict, &["/api/account/delete", "/api/account/export"]),
    (Preset::Signup, &["/api/auth/signup"]),
    (
        Preset::PasswordReset,
        &["/api/auth/forgot-password", "/api/auth/reset-password"],
    ),
    (Preset::Api, &["/api/{*path}"]),
];

pub fn app(state: Arc<AppState>) -> Router {
    let mut router = Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler));

    for (preset, paths) in GUARDED_ROUTES {
        router = router.merge(guarded(&state, preset, paths));
    }

    router.with_state(state)
}

fn guarded(state: &Arc<AppState>, preset: Preset, paths: &[&str]) -> Router<Arc<AppState>> {
    let guard = Guard::new(Arc::clone(&state.rate_limiter), preset);

    paths
        .iter()
        .fold(Router::new(), |router, path| router.route(path, any(proxy_handler)))
        .route_layer(middleware::from_fn_with_state(guard, rate_limit_middleware))
}
