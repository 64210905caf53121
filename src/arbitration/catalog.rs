//! Domain lists served to extensions
//!
//! A UID either gets the curated (manual) set or the dynamic list: the
//! global buckets merged with its country's buckets, where every day since
//! the UID was first seen unlocks one more day-indexed bucket.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use futures::future::try_join_all;
use serde_json::json;
use tracing::{debug, warn};

use super::CountryResolver;
use crate::cache::MemoCache;
use crate::clock::Clock;
use crate::config::ArbitrationConfig;
use crate::error::{BalancerError, Result};
use crate::models::DomainMap;
use crate::store::{keys, KeyValueStore, StoredValue};

const GLOBAL_SCOPE: &str = "global";
const MS_PER_DAY: i64 = 24 * 60 * 60 * 1000;
/// Highest day bucket a UID can unlock
const MAX_UNLOCKED_DAYS: i64 = 365;

/// Built-in curated set used when none is stored
const DEFAULT_MANUAL_DOMAINS: &[&str] = &[
    "www.fox.com",
    "www.nbc.com",
    "www.pandora.com",
    "www.youtube.com",
];

/// What the caller asked for with the `selfHosted` flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelfHosted {
    #[default]
    Unchanged,
    /// Exclude the UID and serve the curated set
    OptIn,
    /// Drop the exclusion and serve the dynamic list
    Undo,
}

impl SelfHosted {
    pub fn from_param(raw: Option<&str>) -> Self {
        match raw {
            Some("true") => Self::OptIn,
            Some("undo") => Self::Undo,
            _ => Self::Unchanged,
        }
    }
}

/// Day buckets loaded so far for one scope
type Buckets = BTreeMap<u32, DomainMap>;

pub struct DomainCatalog {
    store: KeyValueStore,
    countries: CountryResolver,
    config: Arc<ArbitrationConfig>,
    clock: Arc<dyn Clock>,
    buckets: MemoCache<String, Buckets>,
}

impl DomainCatalog {
    pub fn new(
        store: KeyValueStore,
        countries: CountryResolver,
        config: Arc<ArbitrationConfig>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let buckets = MemoCache::new(config.domain_list_cache_ttl, 512, clock.clone());
        Self {
            store,
            countries,
            config,
            clock,
            buckets,
        }
    }

    /// Domain list for a UID
    pub async fn list(
        &self,
        uid: Option<&str>,
        ip: &str,
        self_hosted: SelfHosted,
    ) -> Result<DomainMap> {
        let uid = match uid.map(str::trim) {
            Some(uid) if !uid.is_empty() => uid,
            _ => return Err(BalancerError::InvalidUid),
        };

        match self_hosted {
            SelfHosted::OptIn => {
                if let Err(e) = self.store.add_to_set(keys::EXCLUDED_UIDS, &[uid]).await {
                    warn!(uid, error = %e, "Failed to exclude UID");
                }
                return self.manual_domains().await;
            }
            SelfHosted::Undo => {
                if let Err(e) = self.store.remove_from_set(keys::EXCLUDED_UIDS, uid).await {
                    warn!(uid, error = %e, "Failed to remove UID exclusion");
                }
                return self.domains_for_uid(uid, ip).await;
            }
            SelfHosted::Unchanged => {}
        }

        if self.is_excluded(uid).await? {
            return self.manual_domains().await;
        }
        self.domains_for_uid(uid, ip).await
    }

    pub async fn is_excluded(&self, uid: &str) -> Result<bool> {
        self.store.is_member(keys::EXCLUDED_UIDS, uid).await
    }

    /// The curated set, or the built-in one when none is stored
    pub async fn manual_domains(&self) -> Result<DomainMap> {
        match self.store.get(&keys::static_domains()).await {
            Ok(Some(domains)) => return Ok(domains),
            Ok(None) => warn!("No curated domains stored, serving built-in set"),
            Err(BalancerError::Malformed { .. }) => {
                warn!("Stored curated domains are unreadable, serving built-in set")
            }
            Err(e) => return Err(e),
        }

        Ok(DEFAULT_MANUAL_DOMAINS
            .iter()
            .map(|name| (name.to_string(), json!({"regex": ".*", "xpath": "//*"})))
            .collect())
    }

    async fn domains_for_uid(&self, uid: &str, ip: &str) -> Result<DomainMap> {
        let first_seen = self.first_seen(uid).await?;

        if let Some(cutoff) = self.config.uid_cutoff {
            if first_seen > cutoff.timestamp_millis() {
                return self.manual_domains().await;
            }
        }

        let elapsed = self.clock.now_ms().saturating_sub(first_seen);
        let days_passed = (elapsed / MS_PER_DAY).clamp(0, MAX_UNLOCKED_DAYS) as u32;
        let country = self.countries.country_of(ip).await;

        if let Err(e) = self.store.increment(&keys::throughput("domains")).await {
            warn!(error = %e, "Failed to count domain list throughput");
        }

        let scopes = [GLOBAL_SCOPE.to_string(), country.to_lowercase()];
        let lists = try_join_all(
            scopes
                .iter()
                .map(|scope| self.domains_for_scope(scope, days_passed)),
        )
        .await?;

        debug!(uid, days_passed, country = %country, "Computed domain list");
        let mut merged = DomainMap::new();
        for list in lists {
            merged.extend(list);
        }
        Ok(merged)
    }

    /// Millisecond timestamp of the UID's first request, recorded now if unseen
    async fn first_seen(&self, uid: &str) -> Result<i64> {
        let key = keys::first_request(uid);
        let stored = self
            .store
            .get_object(&key)
            .await?
            .and_then(|record: HashMap<String, StoredValue>| {
                record
                    .get(keys::FIRST_SEEN_DATE_FIELD)
                    .and_then(StoredValue::as_i64)
            });
        if let Some(date) = stored {
            return Ok(date);
        }

        let now = self.clock.now_ms();
        let mut record = BTreeMap::new();
        record.insert(keys::FIRST_SEEN_DATE_FIELD.to_string(), StoredValue::Integer(now));
        self.store.set_object(&key, &record, None).await?;
        debug!(uid, "Recorded first request");
        Ok(now)
    }

    /// Buckets `0..=days_passed` of one scope merged in day order
    async fn domains_for_scope(&self, scope: &str, days_passed: u32) -> Result<DomainMap> {
        let mut buckets = self.buckets.get(&scope.to_string()).unwrap_or_default();

        let missing: Vec<u32> = (0..=days_passed)
            .filter(|day| !buckets.contains_key(day))
            .collect();
        let fetched = try_join_all(missing.iter().map(|&day| self.load_bucket(scope, day))).await?;
        buckets.extend(missing.into_iter().zip(fetched));

        let mut merged = DomainMap::new();
        for (_, bucket) in buckets.range(0..=days_passed) {
            merged.extend(bucket.clone());
        }
        self.buckets.insert(scope.to_string(), buckets);
        Ok(merged)
    }

    async fn load_bucket(&self, scope: &str, day: u32) -> Result<DomainMap> {
        match self.store.get(&keys::domain_bucket(scope, day)).await {
            Ok(bucket) => Ok(bucket.unwrap_or_default()),
            // An unreadable bucket contributes nothing
            Err(BalancerError::Malformed { key }) => {
                debug!(key = %key, "Skipping unreadable domain bucket");
                Ok(DomainMap::new())
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::geo::StaticGeoLookup;
    use crate::store::MemoryBackend;
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::Value;

    const GERMAN_IP: &str = "84.180.213.142";

    struct Fixture {
        catalog: DomainCatalog,
        store: KeyValueStore,
        clock: Arc<ManualClock>,
    }

    fn fixture_with(config: ArbitrationConfig) -> Fixture {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()));
        let store = KeyValueStore::in_memory(MemoryBackend::with_clock(clock.clone()), "test_");
        let geo = StaticGeoLookup::new().with_entry(GERMAN_IP, "DE");
        let countries = CountryResolver::new(store.clone(), Arc::new(geo), "usa");
        Fixture {
            catalog: DomainCatalog::new(store.clone(), countries, Arc::new(config), clock.clone()),
            store,
            clock,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(ArbitrationConfig::default())
    }

    fn bucket(names: &[&str]) -> DomainMap {
        names
            .iter()
            .map(|name| (name.to_string(), json!({"regex": ".*", "xpath": "//video"})))
            .collect()
    }

    async fn store_bucket(store: &KeyValueStore, scope: &str, day: u32, names: &[&str]) {
        store
            .set(&keys::domain_bucket(scope, day), &bucket(names), None)
            .await
            .unwrap();
    }

    fn names(map: &DomainMap) -> Vec<&str> {
        let mut names: Vec<&str> = map.keys().map(String::as_str).collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_missing_uid_rejected() {
        let f = fixture();
        for uid in [None, Some(""), Some("  ")] {
            assert!(matches!(
                f.catalog.list(uid, GERMAN_IP, SelfHosted::Unchanged).await,
                Err(BalancerError::InvalidUid)
            ));
        }
    }

    #[tokio::test]
    async fn test_opt_in_is_idempotent() {
        let f = fixture();

        let first = f.catalog.list(Some("uid-1"), GERMAN_IP, SelfHosted::OptIn).await.unwrap();
        let second = f.catalog.list(Some("uid-1"), GERMAN_IP, SelfHosted::OptIn).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(
            names(&first),
            vec!["www.fox.com", "www.nbc.com", "www.pandora.com", "www.youtube.com"]
        );
        assert_eq!(first["www.fox.com"], json!({"regex": ".*", "xpath": "//*"}));
        assert!(f.catalog.is_excluded("uid-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_excluded_uid_gets_stored_curated_set() {
        let f = fixture();
        f.store
            .set(&keys::static_domains(), &bucket(&["curated.com"]), None)
            .await
            .unwrap();
        f.store.add_to_set(keys::EXCLUDED_UIDS, &["uid-1"]).await.unwrap();

        let list = f.catalog.list(Some("uid-1"), GERMAN_IP, SelfHosted::Unchanged).await.unwrap();
        assert_eq!(names(&list), vec!["curated.com"]);
    }

    #[tokio::test]
    async fn test_undo_restores_dynamic_list() {
        let f = fixture();
        store_bucket(&f.store, "global", 0, &["global.com"]).await;
        f.store.add_to_set(keys::EXCLUDED_UIDS, &["uid-1"]).await.unwrap();

        let list = f.catalog.list(Some("uid-1"), GERMAN_IP, SelfHosted::Undo).await.unwrap();
        assert_eq!(names(&list), vec!["global.com"]);
        assert!(!f.catalog.is_excluded("uid-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_days_passed_unlocks_buckets() {
        let f = fixture();
        store_bucket(&f.store, "global", 0, &["day0.com"]).await;
        store_bucket(&f.store, "global", 1, &["day1.com"]).await;
        store_bucket(&f.store, "global", 2, &["day2.com"]).await;
        store_bucket(&f.store, "de", 0, &["de0.de"]).await;
        store_bucket(&f.store, "de", 2, &["de2.de"]).await;
        store_bucket(&f.store, "usa", 0, &["us0.com"]).await;

        let list = f.catalog.list(Some("uid-1"), GERMAN_IP, SelfHosted::Unchanged).await.unwrap();
        assert_eq!(names(&list), vec!["day0.com", "de0.de"]);

        f.clock.advance(Duration::days(1) + Duration::hours(1));
        let list = f.catalog.list(Some("uid-1"), GERMAN_IP, SelfHosted::Unchanged).await.unwrap();
        assert_eq!(names(&list), vec!["day0.com", "day1.com", "de0.de"]);

        f.clock.advance(Duration::days(1));
        let list = f.catalog.list(Some("uid-1"), GERMAN_IP, SelfHosted::Unchanged).await.unwrap();
        assert_eq!(names(&list), vec!["day0.com", "day1.com", "day2.com", "de0.de", "de2.de"]);
    }

    #[tokio::test]
    async fn test_country_entries_override_global() {
        let f = fixture();
        f.store
            .set(
                &keys::domain_bucket("global", 0),
                &serde_json::from_value(json!({"shop.com": {"xpath": "//global"}})).unwrap(),
                None,
            )
            .await
            .unwrap();
        f.store
            .set(
                &keys::domain_bucket("de", 0),
                &serde_json::from_value(json!({"shop.com": {"xpath": "//de"}})).unwrap(),
                None,
            )
            .await
            .unwrap();

        let list = f.catalog.list(Some("uid-1"), GERMAN_IP, SelfHosted::Unchanged).await.unwrap();
        assert_eq!(list["shop.com"], json!({"xpath": "//de"}));
    }

    #[tokio::test]
    async fn test_first_seen_is_recorded_once() {
        let f = fixture();
        let started = f.clock.now_ms();

        f.catalog.list(Some("uid-1"), GERMAN_IP, SelfHosted::Unchanged).await.unwrap();
        f.clock.advance(Duration::hours(3));
        f.catalog.list(Some("uid-1"), GERMAN_IP, SelfHosted::Unchanged).await.unwrap();

        let record = f.store.get_object("uid-1_domainRequest").await.unwrap().unwrap();
        assert_eq!(record["date"], StoredValue::Integer(started));
    }

    #[tokio::test]
    async fn test_buckets_are_memoized_per_scope() {
        let f = fixture();
        store_bucket(&f.store, "global", 0, &["day0.com"]).await;

        f.catalog.list(Some("uid-1"), GERMAN_IP, SelfHosted::Unchanged).await.unwrap();
        store_bucket(&f.store, "global", 0, &["changed.com"]).await;

        let list = f.catalog.list(Some("uid-2"), GERMAN_IP, SelfHosted::Unchanged).await.unwrap();
        assert_eq!(names(&list), vec!["day0.com"]);

        // Memo hits do not push the reload further out
        f.clock.advance(Duration::minutes(20));
        let list = f.catalog.list(Some("uid-2"), GERMAN_IP, SelfHosted::Unchanged).await.unwrap();
        assert_eq!(names(&list), vec!["day0.com"]);

        f.clock.advance(Duration::minutes(11));
        let list = f.catalog.list(Some("uid-3"), GERMAN_IP, SelfHosted::Unchanged).await.unwrap();
        assert_eq!(names(&list), vec!["changed.com"]);
    }

    #[tokio::test]
    async fn test_ancient_first_seen_is_clamped() {
        let f = fixture();
        store_bucket(&f.store, "global", 365, &["last.com"]).await;
        store_bucket(&f.store, "global", 366, &["beyond.com"]).await;

        for (uid, date) in [("uid-old", 0), ("uid-broken", i64::MIN)] {
            let mut record = BTreeMap::new();
            record.insert(keys::FIRST_SEEN_DATE_FIELD.to_string(), StoredValue::Integer(date));
            f.store
                .set_object(&keys::first_request(uid), &record, None)
                .await
                .unwrap();

            let list = f.catalog.list(Some(uid), GERMAN_IP, SelfHosted::Unchanged).await.unwrap();
            assert_eq!(names(&list), vec!["last.com"]);
        }
    }

    #[tokio::test]
    async fn test_uid_seen_after_cutoff_gets_curated_set() {
        let f = fixture_with(ArbitrationConfig {
            uid_cutoff: Some(Utc.with_ymd_and_hms(2017, 11, 21, 0, 0, 0).unwrap()),
            ..ArbitrationConfig::default()
        });
        store_bucket(&f.store, "global", 0, &["day0.com"]).await;

        let list = f.catalog.list(Some("uid-new"), GERMAN_IP, SelfHosted::Unchanged).await.unwrap();
        assert_eq!(list.len(), 4);
        assert!(list.contains_key("www.youtube.com"));
    }

    #[tokio::test]
    async fn test_unreadable_bucket_is_skipped() {
        let f = fixture();
        store_bucket(&f.store, "global", 0, &["day0.com"]).await;
        f.store
            .set_value("allDomains_de_0", &"[]".into(), None)
            .await
            .unwrap();

        let list = f.catalog.list(Some("uid-1"), GERMAN_IP, SelfHosted::Unchanged).await.unwrap();
        assert_eq!(names(&list), vec!["day0.com"]);
        assert!(list.values().all(Value::is_object));
    }

    #[test]
    fn test_self_hosted_param() {
        assert_eq!(SelfHosted::from_param(Some("true")), SelfHosted::OptIn);
        assert_eq!(SelfHosted::from_param(Some("undo")), SelfHosted::Undo);
        assert_eq!(SelfHosted::from_param(Some("false")), SelfHosted::Unchanged);
        assert_eq!(SelfHosted::from_param(None), SelfHosted::Unchanged);
    }
}
