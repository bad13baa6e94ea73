use serde::{Deserialize, Serialize};

// Body of a 429 response
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitedBody {
    pub error: String,
    pub retry_after: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
}
