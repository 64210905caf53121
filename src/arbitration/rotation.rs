//! Round-robin proxy selection over a persisted cursor

use tracing::{debug, warn};

use crate::error::{BalancerError, Result};
use crate::models::{DomainRecord, ProxyEndpoint};
use crate::store::{keys, KeyValueStore};

/// Selects proxies in round-robin order per country group
///
/// The cursor lives in the shared store so every worker rotates over the
/// same sequence. Reading and advancing the cursor are separate calls, so
/// concurrent requests for one group may be served the same endpoint.
#[derive(Clone)]
pub struct ProxyRotator {
    store: KeyValueStore,
}

impl ProxyRotator {
    pub fn new(store: KeyValueStore) -> Self {
        Self { store }
    }

    /// Next endpoint for the domain's country group
    pub async fn next(&self, domain: &DomainRecord) -> Result<ProxyEndpoint> {
        if domain.proxies.is_empty() {
            return Err(BalancerError::ProxyUnavailable);
        }

        let key = keys::last_proxy_index(&domain.country_group_id);
        let last = self.store.get(&key).await?.unwrap_or(0);
        let len = domain.proxies.len() as u64;

        let group = &domain.country_group_id;
        let next = if last >= len - 1 {
            // Wrap explicitly instead of storing the index modulo len
            if let Err(e) = self.store.set(&key, &0, None).await {
                warn!(group = %group, error = %e, "Failed to reset rotation cursor");
            }
            0
        } else {
            if let Err(e) = self.store.increment(&key).await {
                warn!(group = %group, error = %e, "Failed to advance rotation cursor");
            }
            last + 1
        };

        let proxy = domain.proxies[next as usize].clone();
        debug!(
            group = %domain.country_group_id,
            index = next,
            proxy = %proxy,
            "Selected proxy"
        );
        Ok(proxy)
    }
}
