//! Client country resolution with a store-backed cache

use std::sync::Arc;

use tracing::{debug, warn};

use crate::geo::GeoLookup;
use crate::store::{keys, KeyValueStore};

/// Resolves client IPs to lower-case country codes
///
/// Looks in `{ip}_country` first, then asks the geo lookup and caches the
/// answer. Lookup failures resolve to the default country, which is cached
/// as well.
#[derive(Clone)]
pub struct CountryResolver {
    store: KeyValueStore,
    geo: Arc<dyn GeoLookup>,
    default_country: String,
}

impl CountryResolver {
    pub fn new(
        store: KeyValueStore,
        geo: Arc<dyn GeoLookup>,
        default_country: impl Into<String>,
    ) -> Self {
        Self {
            store,
            geo,
            default_country: default_country.into(),
        }
    }

    pub async fn country_of(&self, ip: &str) -> String {
        let key = keys::country(ip);
        match self.store.get(&key).await {
            Ok(Some(code)) if !code.is_empty() => return code,
            Ok(_) => {}
            Err(e) => warn!(ip, error = %e, "Failed to read cached country"),
        }

        let code = match self.geo.country_code(ip).await {
            Ok(code) => code,
            Err(e) => {
                debug!(ip, error = %e, default = %self.default_country, "Geo lookup failed");
                self.default_country.clone()
            }
        };

        if let Err(e) = self.store.set(&key, &code, None).await {
            warn!(ip, error = %e, "Failed to cache country");
        }
        code
    }
}
