use axum::http::HeaderMap;

// Shared bucket for callers we cannot identify
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Client identifier from forwarded-address headers.
///
/// Takes the first hop of `x-forwarded-for`, then `x-real-ip`. The value is
/// opaque and never validated as an address; anything missing or blank falls
/// back to [`UNKNOWN_CLIENT`].
pub fn client_identifier(headers: &HeaderMap) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(str::trim)
        .filter(|s| !s.is_empty());

    let real_ip = || {
        headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    };

    forwarded
        .or_else(real_ip)
        .unwrap_or(UNKNOWN_CLIENT)
        .to_string()
}

/// Partial form of an identifier, safe to put in logs.
pub fn mask_identifier(identifier: &str) -> String {
    if identifier == UNKNOWN_CLIENT {
        return identifier.to_string();
    }

    let octets: Vec<&str> = identifier.split('.').collect();
    if octets.len() == 4 && octets.iter().all(|o| o.parse::<u8>().is_ok()) {
        return format!("{}.{}.x.x", octets[0], octets[1]);
    }

    if identifier.contains(':') {
        let groups: Vec<&str> = identifier.split(':').take(2).collect();
        return format!("{}:x", groups.join(":"));
    }

    let prefix: String = identifier.chars().take(4).collect();
    format!("{prefix}***")
}
