//! Per-browser extension configuration

use serde_json::{json, Map, Value};
use tracing::debug;

use super::share::share_notice;
use crate::error::{BalancerError, Result};
use crate::store::{keys, KeyValueStore};

const MESSAGES_SLOT: &str = "[messages]";
const NOTIFICATION_SLOT: &str = "[notification]";
const SHARE_SLOT: &str = "[share]";

/// Query parameters of a config request
#[derive(Debug, Clone, Default)]
pub struct ConfigParams {
    pub browser: Option<String>,
    pub language: Option<String>,
    pub version: Option<String>,
    pub uid: Option<String>,
    pub monetized: bool,
}

/// Builds extension configs from the stored template and messages
#[derive(Clone)]
pub struct ClientConfigService {
    store: KeyValueStore,
}

impl ClientConfigService {
    pub fn new(store: KeyValueStore) -> Self {
        Self { store }
    }

    pub async fn get_config(&self, params: &ConfigParams) -> Result<Value> {
        let (browser, language, version) = match (
            non_empty(&params.browser),
            non_empty(&params.language),
            non_empty(&params.version),
        ) {
            (Some(browser), Some(language), Some(version)) => (browser, language, version),
            _ => return Err(BalancerError::InvalidConfigParams),
        };

        let config_key = keys::extension_config(browser);
        let messages_key = keys::extension_messages(browser);
        let (template, messages) =
            tokio::try_join!(self.store.get(&config_key), self.store.get(&messages_key))?;
        let mut config = template.ok_or_else(|| {
            BalancerError::Unexpected(format!("no extension config stored for {browser}"))
        })?;
        let messages = messages.unwrap_or_else(|| Value::Object(Map::new()));

        let localized = embedded_json(messages.get(language))?
            .unwrap_or_else(|| Value::Object(Map::new()));
        let notification = notification_for(browser, language, version, &messages)?;
        let share = Value::String(share_notice(browser, language, params.monetized));

        fill_slots(&mut config, &|slot: &str| match slot {
            MESSAGES_SLOT => Some(localized.clone()),
            NOTIFICATION_SLOT => Some(notification.clone()),
            SHARE_SLOT => Some(share.clone()),
            _ => None,
        });

        if let Some(uid) = non_empty(&params.uid) {
            let excluded = self.store.is_member(keys::EXCLUDED_UIDS, uid).await?;
            if let Value::Object(fields) = &mut config {
                fields.insert("isExcluded".to_string(), Value::Bool(excluded));
            }
        }
        Ok(config)
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Notification shown when nothing is configured
pub fn default_notification(browser: &str) -> Value {
    match browser {
        "chrome" => json!({
            "active": false,
            "title": null,
            "message": null,
            "imgurl": null,
            "buttontext": null,
            "clicklink": null,
        }),
        "firefox" => json!({
            "active": false,
            "title": null,
            "message": null,
            "clicklink": null,
        }),
        _ => json!({"active": false}),
    }
}

/// Localized notification merged over the default, for clients older than
/// `minVersion`; the plain default for everyone else
fn notification_for(
    browser: &str,
    language: &str,
    version: &str,
    messages: &Value,
) -> Result<Value> {
    let mut notification = default_notification(browser);

    let min_version = messages.get("minVersion").and_then(Value::as_str);
    let outdated = min_version.is_some_and(|min| is_older(version, min));
    if !outdated {
        return Ok(notification);
    }

    let field = if language == "en" {
        "notificationEn"
    } else {
        "notificationDe"
    };
    if let (Value::Object(base), Some(Value::Object(localized))) =
        (&mut notification, embedded_json(messages.get(field))?)
    {
        base.extend(localized);
    }
    Ok(notification)
}

/// Whether `version` is strictly below `min_version`.
///
/// Build suffixes after `-` are ignored and short versions are padded, so
/// `2.1-beta` compares as `2.1.0`. Unparsable versions never count as older.
pub fn is_older(version: &str, min_version: &str) -> bool {
    let release = version.split('-').next().unwrap_or_default();
    match (normalize(release), normalize(min_version)) {
        (Some(actual), Some(min)) => actual < min,
        _ => {
            debug!(version, min_version, "Unparsable version, notification suppressed");
            false
        }
    }
}

fn normalize(version: &str) -> Option<semver::Version> {
    let parts: Vec<&str> = version.trim().split('.').collect();
    if parts.is_empty() || parts.len() > 3 {
        return None;
    }
    let mut numbers = [0u64; 3];
    for (slot, part) in numbers.iter_mut().zip(&parts) {
        *slot = part.parse().ok()?;
    }
    semver::Version::parse(&format!("{}.{}.{}", numbers[0], numbers[1], numbers[2])).ok()
}

/// Message entries are stored either as JSON text or as inline JSON
fn embedded_json(value: Option<&Value>) -> Result<Option<Value>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(text)) => Ok(Some(serde_json::from_str(text)?)),
        Some(other) => Ok(Some(other.clone())),
    }
}

/// Replace every string equal to a known slot name, anywhere in the tree
fn fill_slots(value: &mut Value, fill: &dyn Fn(&str) -> Option<Value>) {
    let replacement = match value {
        Value::String(text) => fill(text.as_str()),
        Value::Array(items) => {
            items.iter_mut().for_each(|item| fill_slots(item, fill));
            None
        }
        Value::Object(fields) => {
            fields.values_mut().for_each(|field| fill_slots(field, fill));
            None
        }
        _ => None,
    };
    if let Some(replacement) = replacement {
        *value = replacement;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryBackend;

    fn params(browser: &str, language: &str, version: &str) -> ConfigParams {
        ConfigParams {
            browser: Some(browser.to_string()),
            language: Some(language.to_string()),
            version: Some(version.to_string()),
            uid: None,
            monetized: false,
        }
    }

    async fn service() -> (ClientConfigService, KeyValueStore) {
        let store = KeyValueStore::in_memory(MemoryBackend::new(), "test_");
        store
            .set(
                &keys::extension_config("chrome"),
                &json!({
                    "interval": 30,
                    "messages": "[messages]",
                    "ui": {"notification": "[notification]", "share": "[share]"}
                }),
                None,
            )
            .await
            .unwrap();
        store
            .set(
                &keys::extension_messages("chrome"),
                &json!({
                    "en": "{\"hello\":\"Hello\"}",
                    "de": "{\"hello\":\"Hallo\"}",
                    "minVersion": "2.0.0",
                    "notificationEn": "{\"active\":true,\"title\":\"Update\"}",
                    "notificationDe": "{\"active\":true,\"title\":\"Aktualisieren\"}"
                }),
                None,
            )
            .await
            .unwrap();
        (ClientConfigService::new(store.clone()), store)
    }

    #[tokio::test]
    async fn test_missing_params_rejected() {
        let (service, _) = service().await;
        let mut incomplete = params("chrome", "en", "1.0.0");
        incomplete.version = None;
        assert!(matches!(
            service.get_config(&incomplete).await,
            Err(BalancerError::InvalidConfigParams)
        ));

        let blank = params("", "en", "1.0.0");
        assert!(matches!(
            service.get_config(&blank).await,
            Err(BalancerError::InvalidConfigParams)
        ));
    }

    #[tokio::test]
    async fn test_old_client_gets_localized_notification() {
        let (service, _) = service().await;
        let config = service.get_config(&params("chrome", "de", "1.9.3")).await.unwrap();

        assert_eq!(config["interval"], 30);
        assert_eq!(config["messages"], json!({"hello": "Hallo"}));
        assert_eq!(
            config["ui"]["notification"],
            json!({
                "active": true,
                "title": "Aktualisieren",
                "message": null,
                "imgurl": null,
                "buttontext": null,
                "clicklink": null
            })
        );
        assert!(config["ui"]["share"]
            .as_str()
            .unwrap()
            .contains("ProxFlow braucht"));
        assert!(config.get("isExcluded").is_none());
    }

    #[tokio::test]
    async fn test_current_client_gets_default_notification() {
        let (service, _) = service().await;
        for version in ["2.0.0", "2.0.0-beta", "2.1"] {
            let config = service.get_config(&params("chrome", "en", version)).await.unwrap();
            assert_eq!(config["ui"]["notification"], default_notification("chrome"));
            assert_eq!(config["messages"], json!({"hello": "Hello"}));
        }
    }

    #[tokio::test]
    async fn test_unknown_language_gets_empty_messages() {
        let (service, _) = service().await;
        let config = service.get_config(&params("chrome", "fr", "2.0.0")).await.unwrap();
        assert_eq!(config["messages"], json!({}));
    }

    #[tokio::test]
    async fn test_uid_exclusion_attached() {
        let (service, store) = service().await;
        store.add_to_set(keys::EXCLUDED_UIDS, &["uid-1"]).await.unwrap();

        let mut with_uid = params("chrome", "en", "2.0.0");
        with_uid.uid = Some("uid-1".to_string());
        assert_eq!(service.get_config(&with_uid).await.unwrap()["isExcluded"], true);

        with_uid.uid = Some("uid-2".to_string());
        assert_eq!(service.get_config(&with_uid).await.unwrap()["isExcluded"], false);
    }

    #[tokio::test]
    async fn test_missing_template_is_unexpected() {
        let (service, _) = service().await;
        assert!(matches!(
            service.get_config(&params("opera", "en", "1.0.0")).await,
            Err(BalancerError::Unexpected(_))
        ));
    }

    #[test]
    fn test_version_comparison() {
        assert!(is_older("1.9.9", "2.0.0"));
        assert!(is_older("1.2-rc1", "1.2.1"));
        assert!(!is_older("2.0", "2.0.0"));
        assert!(!is_older("10.0.0", "9.9.9"));
        assert!(!is_older("nightly", "2.0.0"));
        assert!(!is_older("1.0.0", "latest"));
    }

    #[test]
    fn test_default_notification_per_browser() {
        assert_eq!(default_notification("firefox")["clicklink"], Value::Null);
        assert!(default_notification("firefox").get("imgurl").is_none());
        assert_eq!(default_notification("opera"), json!({"active": false}));
    }
}
