pub mod client;
pub mod config;
pub mod error;
pub mod handlers;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod presets;
pub mod rate_limit;
pub mod router;
pub mod state;
pub mod upstream;
