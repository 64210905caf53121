//! Proxy assignment handler

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::{cache_until_midnight, client_ip};
use crate::api::server::AppState;
use crate::models::Decision;

/// Query parameters of `/get-proxy`
#[derive(Debug, Deserialize, Default)]
pub struct GetProxyQuery {
    pub domain: Option<String>,
    pub ip: Option<String>,
    /// Only the literal `true` counts
    pub monetized: Option<String>,
}

/// Decide whether the caller gets a proxy for `domain`
pub async fn get_proxy(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Query(query): Query<GetProxyQuery>,
) -> Response {
    let ip = client_ip(
        query.ip.as_deref(),
        &headers,
        peer.map(|ConnectInfo(addr)| addr),
    );
    let monetized = query.monetized.as_deref() == Some("true");

    let decision = state
        .engine
        .decide(query.domain.as_deref().unwrap_or_default(), &ip, monetized)
        .await;

    render(decision, state.clock.now())
}

/// Payment notices redirect; cacheable answers carry expiry headers instead
/// of the `needCache` flag
fn render(decision: Decision, now: DateTime<Utc>) -> Response {
    match decision {
        Decision::Notification { notification } => {
            (StatusCode::FOUND, [(header::LOCATION, notification.url)]).into_response()
        }
        decision if decision.need_cache() => (
            cache_until_midnight(now),
            Json(decision.without_cache_hint()),
        )
            .into_response(),
        decision => Json(decision).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{app, get, send, US_IP};
    use super::*;
    use crate::models::{DomainRecord, ProxyEndpoint};
    use crate::store::keys;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::json;

    fn record(name: &str, max_requests: u64, added_manually: bool) -> DomainRecord {
        DomainRecord {
            name: name.to_string(),
            allowed_geo: Default::default(),
            blocked_geo: Default::default(),
            max_requests,
            prevent_count: false,
            added_manually,
            country_group_id: "1".to_string(),
            proxies: vec![
                ProxyEndpoint::new("10.0.0.1", 3128),
                ProxyEndpoint::new("10.0.0.2", 3128),
            ],
        }
    }

    #[tokio::test]
    async fn test_grant_then_redirect_then_cached_error() {
        let test = app();
        test.store
            .set(&keys::domain("example.com"), &record("example.com", 2, false), None)
            .await
            .unwrap();
        let uri = format!("/get-proxy?domain=example.com&ip={US_IP}");

        let (status, headers, body) = get(&test.router, &uri).await;
        assert_eq!(status, StatusCode::OK);
        assert!(headers.get(header::CACHE_CONTROL).is_none());
        assert_eq!(body, json!({"proxy": {"ip": "10.0.0.2", "port": 3128}}));
        let (status, _, _) = get(&test.router, &uri).await;
        assert_eq!(status, StatusCode::OK);

        let (status, headers, _) = get(&test.router, &uri).await;
        assert_eq!(status, StatusCode::FOUND);
        assert_eq!(
            headers[header::LOCATION],
            "https://xml-api.herokuapp.com/?pid=1237&psubid=GC&d=example.com"
        );

        let (status, headers, body) = get(&test.router, &uri).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CACHE_CONTROL], "public, max-age=21600");
        assert_eq!(headers[header::EXPIRES], "Mon, 11 Mar 2024 00:00:00 GMT");
        assert_eq!(
            body,
            json!({"error": {
                "type": 3,
                "message": "Fair use of our service for this website has been exceeded"
            }})
        );
    }

    #[tokio::test]
    async fn test_manual_domain_is_cached_without_flag() {
        let test = app();
        test.store
            .set(&keys::domain("youtube.com"), &record("youtube.com", 0, true), None)
            .await
            .unwrap();

        let (status, headers, body) =
            get(&test.router, "/get-proxy?domain=www.youtube.com&ip=1.1.1.1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CACHE_CONTROL], "public, max-age=21600");
        assert!(body.get("needCache").is_none());
        assert!(body.get("proxy").is_some());
    }

    #[tokio::test]
    async fn test_forwarded_address_used_for_quota() {
        let test = app();
        test.store
            .set(&keys::domain("example.com"), &record("example.com", 10, false), None)
            .await
            .unwrap();

        let request = Request::get("/get-proxy?domain=example.com")
            .header("x-forwarded-for", "84.180.213.142, 10.0.0.1")
            .body(Body::empty())
            .unwrap();
        let (status, _, _) = send(&test.router, request).await;
        assert_eq!(status, StatusCode::OK);

        assert_eq!(
            test.store
                .get(&keys::requests_count("84.180.213.142", "example.com"))
                .await
                .unwrap(),
            Some(1)
        );
    }

    #[tokio::test]
    async fn test_monetized_requires_literal_true() {
        let test = app();
        test.store
            .set(&keys::domain("example.com"), &record("example.com", 1, false), None)
            .await
            .unwrap();

        let (status, _, _) =
            get(&test.router, "/get-proxy?domain=example.com&ip=1.1.1.1&monetized=true").await;
        assert_eq!(status, StatusCode::OK);

        // The monetized request still counted, so this one hits the limit
        let (status, headers, _) =
            get(&test.router, "/get-proxy?domain=example.com&ip=1.1.1.1&monetized=1").await;
        assert_eq!(status, StatusCode::FOUND);
        assert!(headers.contains_key(header::LOCATION));
    }

    #[tokio::test]
    async fn test_missing_domain_is_not_found() {
        let test = app();
        let (status, _, body) = get(&test.router, "/get-proxy").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({"error": {"type": 1, "message": "Domain not supported"}})
        );
    }
}
