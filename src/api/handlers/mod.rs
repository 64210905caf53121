//! API request handlers

pub mod config;
pub mod domains;
pub mod health;
pub mod proxy;

use std::net::SocketAddr;

use axum::http::{header, HeaderMap, HeaderName};
use chrono::{DateTime, Duration, Utc};

/// Client address: explicit `ip` parameter, then the first `X-Forwarded-For`
/// hop, then the peer
pub(crate) fn client_ip(
    query_ip: Option<&str>,
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
) -> String {
    if let Some(ip) = query_ip.map(str::trim).filter(|ip| !ip.is_empty()) {
        return ip.to_string();
    }

    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// `Cache-Control` and `Expires` headers valid until the next UTC midnight
pub(crate) fn cache_until_midnight(now: DateTime<Utc>) -> [(HeaderName, String); 2] {
    let midnight = now
        .date_naive()
        .succ_opt()
        .and_then(|day| day.and_hms_opt(0, 0, 0))
        .map(|at| at.and_utc())
        .unwrap_or_else(|| now + Duration::days(1));
    let seconds_left = (midnight - now).num_seconds().max(0);

    [
        (
            header::CACHE_CONTROL,
            format!("public, max-age={seconds_left}"),
        ),
        (
            header::EXPIRES,
            midnight.format("%a, %d %b %Y %H:%M:%S GMT").to_string(),
        ),
    ]
}
