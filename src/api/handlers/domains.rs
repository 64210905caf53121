//! Domain list handler

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use super::{cache_until_midnight, client_ip};
use crate::api::server::AppState;
use crate::arbitration::SelfHosted;

/// Query parameters of `/domains`
#[derive(Debug, Deserialize, Default)]
pub struct DomainsQuery {
    pub uid: Option<String>,
    pub ip: Option<String>,
    /// `true` opts in to the curated set, `undo` opts back out
    #[serde(rename = "selfHosted")]
    pub self_hosted: Option<String>,
}

/// Domains the extension should route; cached until midnight either way
pub async fn list_domains(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Query(query): Query<DomainsQuery>,
) -> Response {
    let ip = client_ip(
        query.ip.as_deref(),
        &headers,
        peer.map(|ConnectInfo(addr)| addr),
    );
    let self_hosted = SelfHosted::from_param(query.self_hosted.as_deref());

    let cache = cache_until_midnight(state.clock.now());
    match state
        .engine
        .list_domains(query.uid.as_deref(), &ip, self_hosted)
        .await
    {
        Ok(domains) => (cache, Json(domains)).into_response(),
        Err(decision) => (cache, Json(decision.without_cache_hint())).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{app, get};
    use crate::store::keys;
    use axum::http::{header, StatusCode};
    use chrono::Duration;
    use serde_json::json;

    #[tokio::test]
    async fn test_missing_uid_is_cached_error() {
        let test = app();
        let (status, headers, body) = get(&test.router, "/domains?ip=1.1.1.1").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CACHE_CONTROL], "public, max-age=21600");
        assert_eq!(
            body,
            json!({"error": {"type": 5, "message": "UID is missing or incorrect"}})
        );
    }

    #[tokio::test]
    async fn test_opt_in_and_undo() {
        let test = app();

        let (_, _, curated) =
            get(&test.router, "/domains?uid=abc&ip=1.1.1.1&selfHosted=true").await;
        assert_eq!(curated["www.youtube.com"], json!({"regex": ".*", "xpath": "//*"}));
        assert!(test
            .store
            .is_member(keys::EXCLUDED_UIDS, "abc")
            .await
            .unwrap());

        let (_, _, dynamic) =
            get(&test.router, "/domains?uid=abc&ip=1.1.1.1&selfHosted=undo").await;
        assert_eq!(dynamic, json!({}));
        assert!(!test
            .store
            .is_member(keys::EXCLUDED_UIDS, "abc")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_buckets_unlock_with_age() {
        let test = app();
        test.store
            .set(
                &keys::domain_bucket("global", 0),
                &serde_json::from_value(json!({"a.com": {"regex": "a"}})).unwrap(),
                None,
            )
            .await
            .unwrap();
        test.store
            .set(
                &keys::domain_bucket("global", 1),
                &serde_json::from_value(json!({"b.com": {"regex": "b"}})).unwrap(),
                None,
            )
            .await
            .unwrap();

        let (_, _, first) = get(&test.router, "/domains?uid=abc&ip=1.1.1.1").await;
        assert_eq!(first, json!({"a.com": {"regex": "a"}}));

        test.clock.advance(Duration::days(1));
        let (_, headers, later) = get(&test.router, "/domains?uid=abc&ip=1.1.1.1").await;
        assert_eq!(
            later,
            json!({"a.com": {"regex": "a"}, "b.com": {"regex": "b"}})
        );
        assert_eq!(headers[header::EXPIRES], "Tue, 12 Mar 2024 00:00:00 GMT");
    }
}
