use crate::error::{BalancerError, Result};
use crate::store::RetryPolicy;
use chrono::{DateTime, NaiveDate, Utc};
use std::env;
use std::time::Duration;
use url::Url;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP listener
    pub server: ServerConfig,
    /// Key-value backend
    pub redis: RedisConfig,
    /// Quota, rotation and domain list tuning
    pub arbitration: ArbitrationConfig,
    /// Geo database
    pub geo: GeoConfig,
    /// In-process purge jobs
    pub maintenance: MaintenanceConfig,
    /// Logging configuration
    pub log: LogConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to (default: 0.0.0.0)
    pub host: String,
    /// Port to bind to (default: 4000)
    pub port: u16,
    /// CORS allowed origins; empty allows any origin
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Full connection URL; wins over host and port when set
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    /// Prefix applied to every stored key
    pub data_prefix: String,
    /// Retries per connect cycle
    pub connect_retries: u32,
    /// Fixed delay between retries in milliseconds
    pub retry_delay_ms: u64,
}

impl RedisConfig {
    /// Connection URL for the client
    pub fn url(&self) -> String {
        match &self.url {
            Some(url) => url.clone(),
            None => format!("redis://{}:{}/", self.host, self.port),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.connect_retries,
            delay: Duration::from_millis(self.retry_delay_ms),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArbitrationConfig {
    /// Lifetime of exceed records and their counters, in seconds
    pub exceed_time: u64,
    /// Country used when geo lookup fails
    pub default_country: String,
    /// Domains whose resolved records are memoized in-process
    pub hot_domains: Vec<String>,
    pub hot_domain_ttl: Duration,
    /// Lifetime of memoized day buckets
    pub domain_list_cache_ttl: Duration,
    /// Payment redirect base; the domain is appended as `d`
    pub payment_redirect_url: Url,
    /// UIDs first seen after this instant receive the curated set
    pub uid_cutoff: Option<DateTime<Utc>>,
}

impl ArbitrationConfig {
    /// Redirect target for a domain that needs payment
    pub fn payment_url(&self, domain: &str) -> String {
        let mut url = self.payment_redirect_url.clone();
        url.query_pairs_mut().append_pair("d", domain);
        url.to_string()
    }
}

impl Default for ArbitrationConfig {
    fn default() -> Self {
        Self {
            exceed_time: 86_400,
            default_country: "usa".to_string(),
            hot_domains: DEFAULT_HOT_DOMAINS
                .split(',')
                .map(str::to_string)
                .collect(),
            hot_domain_ttl: Duration::from_secs(1800),
            domain_list_cache_ttl: Duration::from_secs(1800),
            payment_redirect_url: Url::parse(DEFAULT_PAYMENT_REDIRECT_URL)
                .expect("default payment URL is valid"),
            uid_cutoff: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GeoConfig {
    /// MaxMind country database file
    pub db_path: String,
}

#[derive(Debug, Clone)]
pub struct MaintenanceConfig {
    /// Run purge jobs inside this process
    pub enabled: bool,
    /// Period of the request counter purge
    pub counter_interval: Duration,
    /// Period of the country cache purge
    pub country_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: String,
}

const DEFAULT_HOT_DOMAINS: &str = "youtube.com,pandora.com,nbc.com,fox.com";
const DEFAULT_PAYMENT_REDIRECT_URL: &str = "https://xml-api.herokuapp.com/?pid=1237&psubid=GC";

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            server: ServerConfig {
                host: get_env_or("HOST", "0.0.0.0"),
                port: get_env_or("PORT", "4000").parse().map_err(|_| {
                    BalancerError::InvalidConfig("PORT must be a valid port number".into())
                })?,
                cors_origins: get_env_or("CORS_ORIGINS", "")
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            },
            redis: RedisConfig {
                url: env::var("REDIS_URL").ok().filter(|url| !url.trim().is_empty()),
                host: get_env_or("REDIS_HOST", "127.0.0.1"),
                port: get_env_or("REDIS_PORT", "6379").parse().map_err(|_| {
                    BalancerError::InvalidConfig("REDIS_PORT must be a valid port number".into())
                })?,
                data_prefix: get_env_or("REDIS_DATA_PREFIX", "loadBalancerData_"),
                connect_retries: parse_env("REDIS_CONNECT_RETRIES", "5")?,
                retry_delay_ms: parse_env("REDIS_RETRY_DELAY_MS", "1000")?,
            },
            arbitration: ArbitrationConfig {
                exceed_time: parse_env("EXCEED_TIME", "86400")?,
                default_country: get_env_or("DEFAULT_COUNTRY", "usa").to_lowercase(),
                hot_domains: get_env_or("HOT_DOMAINS", DEFAULT_HOT_DOMAINS)
                    .split(',')
                    .map(|s| s.trim().to_lowercase())
                    .filter(|s| !s.is_empty())
                    .collect(),
                hot_domain_ttl: Duration::from_secs(parse_env("HOT_DOMAIN_TTL_SECS", "1800")?),
                domain_list_cache_ttl: Duration::from_secs(parse_env(
                    "DOMAIN_LIST_CACHE_TTL_SECS",
                    "1800",
                )?),
                payment_redirect_url: Url::parse(&get_env_or(
                    "PAYMENT_REDIRECT_URL",
                    DEFAULT_PAYMENT_REDIRECT_URL,
                ))?,
                uid_cutoff: parse_cutoff(env::var("UID_CUTOFF_DATE").ok().as_deref())?,
            },
            geo: GeoConfig {
                db_path: get_env_or("GEOIP_DB_PATH", "sources/GeoIP2-Country.mmdb"),
            },
            maintenance: MaintenanceConfig {
                enabled: get_env_or("MAINTENANCE_ENABLED", "false")
                    .parse()
                    .unwrap_or(false),
                counter_interval: Duration::from_secs(
                    parse_env::<u64>("COUNTER_PURGE_INTERVAL_SECS", "86400")?.max(1),
                ),
                country_interval: Duration::from_secs(
                    parse_env::<u64>("COUNTRY_PURGE_INTERVAL_SECS", "604800")?.max(1),
                ),
            },
            log: LogConfig {
                level: get_env_or("LOG_LEVEL", "info"),
                format: get_env_or("LOG_FORMAT", "json"),
            },
        })
    }

    /// Get the HTTP listener address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

/// Accepts a full RFC 3339 timestamp or a bare `YYYY-MM-DD` date
fn parse_cutoff(raw: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    let raw = match raw.map(str::trim) {
        None | Some("") => return Ok(None),
        Some(raw) => raw,
    };

    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Ok(Some(at.with_timezone(&Utc)));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|at| Some(at.and_utc()))
        .ok_or_else(|| {
            BalancerError::InvalidConfig(format!(
                "UID_CUTOFF_DATE must be an RFC 3339 timestamp or YYYY-MM-DD date, got {raw}"
            ))
        })
}

fn parse_env<T: std::str::FromStr>(key: &str, default: &str) -> Result<T> {
    get_env_or(key, default)
        .trim()
        .parse()
        .map_err(|_| BalancerError::InvalidConfig(format!("{key} must be a valid number")))
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}
