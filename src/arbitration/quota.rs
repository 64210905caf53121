//! Per-client request quotas

use std::sync::Arc;

use tracing::{debug, info};

use crate::clock::Clock;
use crate::config::ArbitrationConfig;
use crate::error::{BalancerError, Result};
use crate::models::DomainRecord;
use crate::store::{keys, KeyValueStore};

/// Result of a quota check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuotaOutcome {
    Granted,
    /// The first request after `max_requests` granted ones; carries the
    /// payment redirect
    PaymentRequired(String),
    /// Any later request; the exceed window starts now
    Exceeded,
    /// An exceed window is already open, started at this millisecond timestamp
    AlreadyExceeded(i64),
}

impl QuotaOutcome {
    pub fn into_result(self) -> Result<()> {
        match self {
            QuotaOutcome::Granted => Ok(()),
            QuotaOutcome::PaymentRequired(url) => Err(BalancerError::PaymentRequired { url }),
            QuotaOutcome::Exceeded => Err(BalancerError::QuotaExceeded),
            QuotaOutcome::AlreadyExceeded(timestamp) => {
                Err(BalancerError::QuotaAlreadyExceeded { timestamp })
            }
        }
    }
}

/// Tracks request counts and exceed windows per (client, domain)
#[derive(Clone)]
pub struct QuotaTracker {
    store: KeyValueStore,
    config: Arc<ArbitrationConfig>,
    clock: Arc<dyn Clock>,
}

impl QuotaTracker {
    pub fn new(
        store: KeyValueStore,
        config: Arc<ArbitrationConfig>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            config,
            clock,
        }
    }

    /// Start of the open exceed window, if any
    pub async fn exceeded_at(&self, ip: &str, domain: &DomainRecord) -> Result<Option<i64>> {
        self.store.get(&keys::exceeded(ip, &domain.name)).await
    }

    /// Count this request and classify it
    pub async fn check(
        &self,
        domain: &DomainRecord,
        ip: &str,
        monetized: bool,
    ) -> Result<QuotaOutcome> {
        if domain.prevent_count {
            return Ok(QuotaOutcome::Granted);
        }

        if let Some(timestamp) = self.exceeded_at(ip, domain).await? {
            return Ok(QuotaOutcome::AlreadyExceeded(timestamp));
        }

        let count_key = keys::requests_count(ip, &domain.name);
        let count = self.store.increment(&count_key).await?;

        if monetized || domain.added_manually {
            return Ok(QuotaOutcome::Granted);
        }

        // Classify by the requests made before this one
        let previous = count.saturating_sub(1);
        debug!(ip, domain = %domain.name, previous, max = domain.max_requests, "Counted request");

        if previous == domain.max_requests {
            return Ok(QuotaOutcome::PaymentRequired(
                self.config.payment_url(&domain.name),
            ));
        }
        if previous > domain.max_requests {
            self.open_exceed_window(ip, domain).await?;
            return Ok(QuotaOutcome::Exceeded);
        }
        Ok(QuotaOutcome::Granted)
    }

    /// Record the exceed event and expire the counter with it.
    ///
    /// The record is created at most once; only the writer that created it
    /// sets the counter's lifetime, so both keys expire together.
    async fn open_exceed_window(&self, ip: &str, domain: &DomainRecord) -> Result<()> {
        let ttl = self.config.exceed_time;
        let now = self.clock.now_ms();

        let created = self
            .store
            .set(&keys::exceeded(ip, &domain.name), &now, Some(ttl))
            .await?;
        if created {
            self.store
                .expire(keys::requests_count(ip, &domain.name).name(), ttl)
                .await?;
            info!(ip, domain = %domain.name, ttl, "Request limit exceeded");
        }
        Ok(())
    }
}
