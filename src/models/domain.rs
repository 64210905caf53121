use std::collections::BTreeSet;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Domain name -> client-side matching rules, as served to extensions
pub type DomainMap = Map<String, Value>;

/// Egress proxy endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyEndpoint {
    pub ip: String,
    #[serde(deserialize_with = "port_from_any")]
    pub port: u16,
}

impl ProxyEndpoint {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self {
            ip: ip.into(),
            port,
        }
    }
}

impl std::fmt::Display for ProxyEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// Registered destination domain
///
/// Stored as JSON under `{name}_domain`. Field names follow the stored
/// layout (`allowedGeo`, `countryId`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainRecord {
    pub name: String,
    #[serde(default)]
    pub allowed_geo: BTreeSet<String>,
    #[serde(default)]
    pub blocked_geo: BTreeSet<String>,
    #[serde(default)]
    pub max_requests: u64,
    #[serde(default)]
    pub prevent_count: bool,
    #[serde(default)]
    pub added_manually: bool,
    #[serde(rename = "countryId", deserialize_with = "string_from_any")]
    pub country_group_id: String,
    #[serde(default)]
    pub proxies: Vec<ProxyEndpoint>,
}

impl DomainRecord {
    /// Apply the allow/block geo policy to a lower-case country code.
    ///
    /// A non-empty allow-list wins; the block-list only applies without one.
    pub fn admits_country(&self, country_code: &str) -> bool {
        let matches = |geo: &String| geo.eq_ignore_ascii_case(country_code);
        if !self.allowed_geo.is_empty() {
            return self.allowed_geo.iter().any(matches);
        }
        !self.blocked_geo.iter().any(matches)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TextOrNumber {
    Text(String),
    Number(serde_json::Number),
}

fn string_from_any<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match TextOrNumber::deserialize(deserializer)? {
        TextOrNumber::Text(text) => text,
        TextOrNumber::Number(number) => number.to_string(),
    })
}

fn port_from_any<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u16, D::Error> {
    let raw = string_from_any(deserializer)?;
    raw.trim()
        .parse()
        .map_err(|_| serde::de::Error::custom(format!("invalid port: {raw}")))
}
