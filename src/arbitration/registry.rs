//! Hostname to registered domain resolution

use std::sync::Arc;

use futures::future::try_join_all;
use tracing::debug;

use crate::cache::MemoCache;
use crate::clock::Clock;
use crate::config::ArbitrationConfig;
use crate::error::{BalancerError, Result};
use crate::models::DomainRecord;
use crate::store::{keys, KeyValueStore};

/// Resolves hostnames to domain records, most specific suffix first
pub struct DomainRegistry {
    store: KeyValueStore,
    hot_domains: Vec<String>,
    hot: MemoCache<String, DomainRecord>,
}

impl DomainRegistry {
    pub fn new(store: KeyValueStore, config: &ArbitrationConfig, clock: Arc<dyn Clock>) -> Self {
        let hot_domains = config.hot_domains.clone();
        // Several hostnames can match one hot entry
        let capacity = hot_domains.len().max(1) * 64;
        Self {
            store,
            hot: MemoCache::new(config.hot_domain_ttl, capacity, clock),
            hot_domains,
        }
    }

    /// Resolve a hostname to the record of its most specific registered suffix
    pub async fn resolve(&self, hostname: &str) -> Result<DomainRecord> {
        let name = self.resolve_name(hostname).await?;

        if let Some(record) = self.hot.get(&name) {
            debug!(domain = %name, "Hot domain served from memo");
            return Ok(record);
        }

        match self.store.get(&keys::domain(&name)).await {
            Ok(Some(record)) => Ok(record),
            Ok(None) | Err(BalancerError::Malformed { .. }) => Err(BalancerError::DomainNotFound),
            Err(e) => Err(e),
        }
    }

    /// Name of the most specific registered suffix of `hostname`
    pub async fn resolve_name(&self, hostname: &str) -> Result<String> {
        let candidates = suffix_candidates(hostname);
        if candidates.is_empty() {
            return Err(BalancerError::DomainNotFound);
        }

        let found = try_join_all(
            candidates
                .iter()
                .map(|name| async move { self.store.exists(keys::domain(name).name()).await }),
        )
        .await?;

        candidates
            .into_iter()
            .zip(found)
            .find_map(|(name, exists)| exists.then_some(name))
            .ok_or(BalancerError::DomainNotFound)
    }

    /// Memoize a resolved record if it belongs to a hot domain; the memo
    /// still expires one TTL after the first load
    pub fn remember(&self, record: &DomainRecord) {
        if self.is_hot(&record.name) {
            self.hot.insert(record.name.clone(), record.clone());
        }
    }

    fn is_hot(&self, name: &str) -> bool {
        self.hot_domains.iter().any(|hot| name.contains(hot.as_str()))
    }
}

/// Dot-joined suffixes, most specific first, down to two labels.
///
/// `a.b.example.com` yields `a.b.example.com`, `b.example.com`, `example.com`.
pub fn suffix_candidates(hostname: &str) -> Vec<String> {
    let hostname = hostname.trim().trim_end_matches('.').to_lowercase();
    let labels: Vec<&str> = hostname.split('.').collect();
    if labels.iter().any(|label| label.is_empty()) {
        return Vec::new();
    }

    (0..labels.len().saturating_sub(1))
        .map(|start| labels[start..].join("."))
        .collect()
}
