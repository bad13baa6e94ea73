use std::time::{Duration, Instant};

use axum::{
    body::{Body, to_bytes},
    extract::Request,
    http::{HeaderMap, header},
    response::Response,
};
use tracing::debug;

use crate::config::normalize_upstream;
use crate::error::AppError;
use crate::metrics::UPSTREAM_LATENCY;

pub const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

// Headers that describe one hop and must not be relayed
const HOP_BY_HOP: [header::HeaderName; 8] = [
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
    header::CONTENT_LENGTH,
];

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP.iter() {
        headers.remove(name);
    }
    headers.remove("keep-alive");
}

/// The Nervi application that admitted requests are relayed to.
pub struct Upstream {
    client: reqwest::Client,
    base_url: String,
}

impl Upstream {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, AppError> {
        let base_url = normalize_upstream(url)?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Relay `req` verbatim and hand back whatever the upstream answered.
    pub async fn forward(&self, req: Request) -> Result<Response, AppError> {
        let (parts, body) = req.into_parts();
        let body = to_bytes(body, MAX_BODY_BYTES)
            .await
            .map_err(|e| AppError::Body(e.to_string()))?;

        let path = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let url = format!("{}{}", self.base_url, path);

        let mut headers = parts.headers;
        strip_hop_by_hop(&mut headers);
        headers.remove(header::HOST);

        debug!("Forwarding {} {}", parts.method, url);
        let start_time = Instant::now();

        let res = self
            .client
            .request(parts.method, url)
            .headers(headers)
            .body(body)
            .send()
            .await?;

        let status = res.status();
        let mut res_headers = res.headers().clone();
        strip_hop_by_hop(&mut res_headers);
        let bytes = res.bytes().await?;

        UPSTREAM_LATENCY.observe(start_time.elapsed().as_secs_f64());

        let mut response = Response::new(Body::from(bytes));
        *response.status_mut() = status;
        *response.headers_mut() = res_headers;
        Ok(response)
    }
}
