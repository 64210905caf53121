//! Client IP to country code lookup

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::Path;

use async_trait::async_trait;
use maxminddb::{geoip2, Reader};
use tracing::info;

use crate::error::{BalancerError, Result};

/// Country lookup consumed by the balancer
///
/// Codes are lower-case ISO codes. Callers fall back to their default
/// country on error.
#[async_trait]
pub trait GeoLookup: Send + Sync {
    async fn country_code(&self, ip: &str) -> Result<String>;
}

/// Lookup over a MaxMind country database
pub struct MaxMindGeoLookup {
    reader: Reader<Vec<u8>>,
}

impl MaxMindGeoLookup {
    /// Load the database file into memory
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await?;
        let reader = Reader::from_source(bytes).map_err(|e| {
            BalancerError::GeoDatabase(format!("failed to parse {}: {}", path.display(), e))
        })?;
        info!(
            path = %path.display(),
            database_type = %reader.metadata.database_type,
            "Loaded geo database"
        );
        Ok(Self { reader })
    }
}

#[async_trait]
impl GeoLookup for MaxMindGeoLookup {
    async fn country_code(&self, ip: &str) -> Result<String> {
        let addr: IpAddr = ip
            .trim()
            .parse()
            .map_err(|_| BalancerError::GeoDatabase(format!("invalid IP address: {ip}")))?;
        let record: geoip2::Country = self
            .reader
            .lookup(addr)
            .map_err(|e| BalancerError::GeoDatabase(e.to_string()))?;

        record
            .country
            .and_then(|country| country.iso_code)
            .or_else(|| record.registered_country.and_then(|country| country.iso_code))
            .map(str::to_lowercase)
            .ok_or_else(|| BalancerError::GeoDatabase(format!("no country recorded for {ip}")))
    }
}

/// Fixed IP to country table
///
/// Used when no database is available and in tests.
#[derive(Debug, Default, Clone)]
pub struct StaticGeoLookup {
    entries: HashMap<String, String>,
}

impl StaticGeoLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(mut self, ip: impl Into<String>, country_code: impl Into<String>) -> Self {
        self.entries
            .insert(ip.into(), country_code.into().to_lowercase());
        self
    }
}

#[async_trait]
impl GeoLookup for StaticGeoLookup {
    async fn country_code(&self, ip: &str) -> Result<String> {
        self.entries
            .get(ip)
            .cloned()
            .ok_or_else(|| BalancerError::GeoDatabase(format!("no country recorded for {ip}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_lookup_lowercases() {
        let geo = StaticGeoLookup::new().with_entry("84.180.213.142", "DE");
        let code = tokio_test::assert_ok!(geo.country_code("84.180.213.142").await);
        assert_eq!(code, "de");
        assert!(matches!(
            geo.country_code("10.0.0.1").await,
            Err(BalancerError::GeoDatabase(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_database_is_io_error() {
        let result = MaxMindGeoLookup::open("/nonexistent/GeoIP2-Country.mmdb").await;
        assert!(matches!(result, Err(BalancerError::Io(_))));
    }
}
