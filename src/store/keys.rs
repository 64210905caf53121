//! Logical key layout
//!
//! Every key family lives here with its declared value type. Names are
//! unprefixed; the store adds the data prefix.

use std::marker::PhantomData;

use serde_json::Value;

use crate::models::{DomainMap, DomainRecord};

/// Typed key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Key<T> {
    name: String,
    _value: PhantomData<fn() -> T>,
}

impl<T> Key<T> {
    fn new(name: String) -> Self {
        Self {
            name,
            _value: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Set of self-hosted UIDs
pub const EXCLUDED_UIDS: &str = "excluded_uids";

/// Field of the first-seen hash holding the millisecond timestamp
pub const FIRST_SEEN_DATE_FIELD: &str = "date";

pub const REQUEST_COUNT_PATTERN: &str = "*_requestsCount";
pub const EXCEEDED_PATTERN: &str = "*_exceeded";
pub const COUNTRY_PATTERN: &str = "*_country";

pub fn domain(name: &str) -> Key<DomainRecord> {
    Key::new(format!("{name}_domain"))
}

pub fn country(ip: &str) -> Key<String> {
    Key::new(format!("{ip}_country"))
}

pub fn requests_count(ip: &str, domain: &str) -> Key<u64> {
    Key::new(format!("{ip}_{domain}_requestsCount"))
}

/// Millisecond timestamp of the exceed event
pub fn exceeded(ip: &str, domain: &str) -> Key<i64> {
    Key::new(format!("{ip}_{domain}_exceeded"))
}

pub fn last_proxy_index(country_group_id: &str) -> Key<u64> {
    Key::new(format!("{country_group_id}_lastProxyIndex"))
}

/// Hash key of the first-seen record
pub fn first_request(uid: &str) -> String {
    format!("{uid}_domainRequest")
}

/// `scope` is `global` or a lower-case country code
pub fn domain_bucket(scope: &str, day: u32) -> Key<DomainMap> {
    Key::new(format!("allDomains_{scope}_{day}"))
}

pub fn extension_config(browser: &str) -> Key<Value> {
    Key::new(format!("extension_config_{browser}"))
}

pub fn extension_messages(browser: &str) -> Key<Value> {
    Key::new(format!("extension_config_{browser}_messages"))
}

pub fn static_domains() -> Key<DomainMap> {
    Key::new("static_domains".to_string())
}

pub fn throughput(endpoint: &str) -> Key<u64> {
    Key::new(format!("{endpoint}_throughput"))
}
