use std::time::Duration;

use clap::Parser;

use crate::error::AppError;
use crate::presets::{Policy, PresetTable};
use crate::rate_limit::DEFAULT_SWEEP_INTERVAL;

// CLI argument structure
#[derive(Parser, Debug, Clone)]
#[command(name = "nervi-guard")]
#[command(about = "Rate limiting gateway in front of the Nervi API")]
pub struct Args {
    // Port to run the server on
    #[arg(short, long, default_value_t = 8080)]
    pub port: u16,

    // Nervi application the gateway forwards to
    // Example: "localhost:3000" or "https://app.internal"
    #[arg(short, long, default_value = "localhost:3000")]
    pub upstream: String,

    // General API preset: max requests per window
    #[arg(long, default_value_t = 100)]
    pub api_limit: u32,

    // General API preset: window in seconds
    #[arg(long, default_value_t = 60)]
    pub api_window: u64,

    // Seconds between sweeps of expired rate limit entries
    #[arg(long, default_value_t = DEFAULT_SWEEP_INTERVAL.as_secs())]
    pub sweep_interval: u64,

    // Upstream request timeout in seconds
    #[arg(long, default_value_t = 30)]
    pub upstream_timeout: u64,

    // Emit logs as JSON lines
    #[arg(long, default_value_t = false)]
    pub log_json: bool,
}

impl Args {
    pub fn presets(&self) -> Result<PresetTable, AppError> {
        let api = Policy::new(self.api_limit, Duration::from_secs(self.api_window))?;
        Ok(PresetTable::default().with_api(api))
    }

    pub fn sweep_interval(&self) -> Result<Duration, AppError> {
        if self.sweep_interval == 0 {
            return Err(AppError::InvalidConfig(
                "sweep interval must be at least one second".to_string(),
            ));
        }
        Ok(Duration::from_secs(self.sweep_interval))
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout)
    }
}

// add http:// if no scheme was given
pub fn normalize_upstream(raw: &str) -> Result<String, AppError> {
    let url = raw.trim().trim_end_matches('/');
    if url.is_empty() {
        return Err(AppError::InvalidUpstream(raw.to_string()));
    }

    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(url.to_string())
    } else if url.contains("://") {
        Err(AppError::InvalidUpstream(raw.to_string()))
    } else {
        Ok(format!("http://{}", url))
    }
}
