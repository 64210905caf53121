//! Extension config handler

use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use crate::api::server::AppState;
use crate::arbitration::ConfigParams;

/// Query parameters of `/config`
#[derive(Debug, Deserialize, Default)]
pub struct ConfigQuery {
    pub browser: Option<String>,
    pub locale: Option<String>,
    pub version: Option<String>,
    pub uid: Option<String>,
    pub monetization: Option<String>,
}

impl From<ConfigQuery> for ConfigParams {
    fn from(query: ConfigQuery) -> Self {
        ConfigParams {
            browser: query.browser,
            language: query.locale,
            version: query.version,
            uid: query.uid,
            monetized: query.monetization.as_deref() == Some("true"),
        }
    }
}

pub async fn get_config(
    State(state): State<AppState>,
    Query(query): Query<ConfigQuery>,
) -> Response {
    match state.engine.get_config(&query.into()).await {
        Ok(config) => Json(config).into_response(),
        Err(decision) => Json(decision).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{app, get};
    use super::*;
    use crate::store::keys;
    use axum::http::StatusCode;
    use serde_json::json;

    #[test]
    fn test_query_maps_to_params() {
        let params = ConfigParams::from(ConfigQuery {
            browser: Some("firefox".to_string()),
            locale: Some("de".to_string()),
            version: Some("1.0.0".to_string()),
            uid: None,
            monetization: Some("yes".to_string()),
        });
        assert_eq!(params.language.as_deref(), Some("de"));
        assert!(!params.monetized);
    }

    #[tokio::test]
    async fn test_config_rendered() {
        let test = app();
        test.store
            .set(
                &keys::extension_config("firefox"),
                &json!({"share": "[share]", "notification": "[notification]"}),
                None,
            )
            .await
            .unwrap();

        let (status, _, body) = get(
            &test.router,
            "/config?browser=firefox&locale=en&version=3.1.0&monetization=true",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["notification"]["active"], false);
        assert!(body["share"].as_str().unwrap().contains("ProxTube"));
    }

    #[tokio::test]
    async fn test_missing_params_rejected() {
        let test = app();
        let (status, _, body) = get(&test.router, "/config?browser=chrome").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["error"]["type"], 6);
    }
}
