use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser; // for cli
use tokio::net::TcpListener;
use tracing::info;

use nervi_guard::config::Args;
use nervi_guard::logging::init_logger;
use nervi_guard::presets::Preset;
use nervi_guard::rate_limit::RateLimiter;
use nervi_guard::router;
use nervi_guard::state::AppState;
use nervi_guard::upstream::Upstream;

#[tokio::main]
async fn main() -> Result<()> {
    // parse cli arguments
    let args = Args::parse();
    init_logger(args.log_json);

    let presets = args.presets().context("Invalid api preset")?;
    let sweep_interval = args.sweep_interval()?;
    let upstream = Upstream::new(&args.upstream, args.upstream_timeout())
        .context("Failed to set up upstream client")?;
    let upstream_url = upstream.base_url().to_string();

    let rate_limiter = Arc::new(RateLimiter::new(presets));
    rate_limiter.start_sweeper(sweep_interval);

    let state = Arc::new(AppState::new(Arc::clone(&rate_limiter), upstream));
    let app = router::app(state);

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("Gateway running on http://localhost:{}", args.port);
    info!("Forwarding to Nervi at {}", upstream_url);
    for preset in Preset::ALL {
        info!("Rate limit preset {}: {}", preset, presets.policy(preset));
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Shutting down...");
    if let Some(sweeper) = rate_limiter.stop() {
        let _ = sweeper.await;
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
