use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, instrument, warn};

use super::{
    ClientConfigService, ConfigParams, CountryResolver, DomainCatalog, DomainRegistry,
    ProxyRotator, QuotaTracker, SelfHosted,
};
use crate::clock::Clock;
use crate::config::ArbitrationConfig;
use crate::error::{BalancerError, Result};
use crate::geo::GeoLookup;
use crate::models::{Decision, DomainMap, DomainRecord};
use crate::store::{keys, KeyValueStore};

/// Grants or denies proxy assignments
///
/// Every entry point resolves to a client-facing answer; internal failures
/// are logged and reported as the unexpected error.
pub struct ArbitrationEngine {
    store: KeyValueStore,
    registry: DomainRegistry,
    quota: QuotaTracker,
    rotator: ProxyRotator,
    countries: CountryResolver,
    catalog: DomainCatalog,
    client_config: ClientConfigService,
}

impl ArbitrationEngine {
    pub fn new(
        store: KeyValueStore,
        geo: Arc<dyn GeoLookup>,
        config: ArbitrationConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let config = Arc::new(config);
        let countries =
            CountryResolver::new(store.clone(), geo, config.default_country.clone());

        Self {
            registry: DomainRegistry::new(store.clone(), &config, clock.clone()),
            quota: QuotaTracker::new(store.clone(), config.clone(), clock.clone()),
            rotator: ProxyRotator::new(store.clone()),
            catalog: DomainCatalog::new(store.clone(), countries.clone(), config, clock),
            client_config: ClientConfigService::new(store.clone()),
            countries,
            store,
        }
    }

    pub fn store(&self) -> &KeyValueStore {
        &self.store
    }

    /// Decide whether `ip` gets a proxy for `domain_name`
    #[instrument(skip(self))]
    pub async fn decide(&self, domain_name: &str, ip: &str, monetized: bool) -> Decision {
        if let Err(e) = self.store.increment(&keys::throughput("get-proxy")).await {
            warn!(error = %e, "Failed to count proxy throughput");
        }

        match self.arbitrate(domain_name, ip, monetized).await {
            Ok(decision) => decision,
            Err(e) => {
                debug!(error = %e, "Request denied");
                Decision::from(e)
            }
        }
    }

    async fn arbitrate(&self, domain_name: &str, ip: &str, monetized: bool) -> Result<Decision> {
        if domain_name.trim().is_empty() {
            return Err(BalancerError::DomainNotFound);
        }
        let domain = self.registry.resolve(domain_name).await?;

        if domain.added_manually {
            let proxy = self.rotator.next(&domain).await?;
            return Ok(Decision::grant(proxy, true));
        }

        // An open exceed window answers before anything else is counted or rotated
        if let Some(timestamp) = self.quota.exceeded_at(ip, &domain).await? {
            return Err(BalancerError::QuotaAlreadyExceeded { timestamp });
        }

        let (geo, quota, (), proxy) = tokio::join!(
            self.check_geo(&domain, ip),
            self.quota.check(&domain, ip, monetized),
            async { self.registry.remember(&domain) },
            self.rotator.next(&domain),
        );

        // First rejection wins, in this order
        geo?;
        quota?.into_result()?;
        let proxy = proxy?;
        Ok(Decision::grant(proxy, domain.added_manually))
    }

    async fn check_geo(&self, domain: &DomainRecord, ip: &str) -> Result<()> {
        let country = self.countries.country_of(ip).await;
        if domain.admits_country(&country) {
            Ok(())
        } else {
            debug!(ip, country = %country, domain = %domain.name, "Country not admitted");
            Err(BalancerError::GeoRejected)
        }
    }

    /// Domain list for a UID, or the error decision to send instead
    #[instrument(skip(self))]
    pub async fn list_domains(
        &self,
        uid: Option<&str>,
        ip: &str,
        self_hosted: SelfHosted,
    ) -> std::result::Result<DomainMap, Decision> {
        self.catalog
            .list(uid, ip, self_hosted)
            .await
            .map_err(Decision::from)
    }

    /// Extension config, or the error decision to send instead
    #[instrument(skip(self))]
    pub async fn get_config(&self, params: &ConfigParams) -> std::result::Result<Value, Decision> {
        self.client_config
            .get_config(params)
            .await
            .map_err(Decision::from)
    }
}
