//! Key maintenance service
//!
//! Purges request counters with their exceed records, and the IP to country
//! cache, each on its own period.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, instrument};

use crate::config::MaintenanceConfig;
use crate::error::Result;
use crate::store::{keys, KeyValueStore};

/// Periodic purge jobs over the shared store
pub struct MaintenanceService {
    store: KeyValueStore,
    counter_interval: Duration,
    country_interval: Duration,
}

impl MaintenanceService {
    pub fn new(store: KeyValueStore, config: &MaintenanceConfig) -> Self {
        Self {
            store,
            counter_interval: config.counter_interval,
            country_interval: config.country_interval,
        }
    }

    /// Run until shutdown is signalled
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            counter_interval_secs = self.counter_interval.as_secs(),
            country_interval_secs = self.country_interval.as_secs(),
            "Starting key maintenance service"
        );

        let mut counters = interval(self.counter_interval);
        let mut countries = interval(self.country_interval);
        counters.set_missed_tick_behavior(MissedTickBehavior::Delay);
        countries.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Skip the immediate ticks
        counters.tick().await;
        countries.tick().await;

        loop {
            tokio::select! {
                _ = counters.tick() => {
                    if let Err(e) = self.purge_request_counts().await {
                        error!(error = %e, "Request counter purge failed");
                    }
                }
                _ = countries.tick() => {
                    if let Err(e) = self.purge_countries().await {
                        error!(error = %e, "Country cache purge failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Key maintenance service shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Delete all request counters, then all exceed records
    #[instrument(skip(self))]
    pub async fn purge_request_counts(&self) -> Result<usize> {
        let counters = self
            .store
            .delete_keys_by_pattern(keys::REQUEST_COUNT_PATTERN)
            .await?;
        let exceeded = self
            .store
            .delete_keys_by_pattern(keys::EXCEEDED_PATTERN)
            .await?;
        info!(counters, exceeded, "Request counters purged");
        Ok(counters + exceeded)
    }

    /// Delete every cached IP to country pair
    #[instrument(skip(self))]
    pub async fn purge_countries(&self) -> Result<usize> {
        let deleted = self
            .store
            .delete_keys_by_pattern(keys::COUNTRY_PATTERN)
            .await?;
        info!(deleted, "Country cache purged");
        Ok(deleted)
    }
}

/// Handle for stopping the maintenance service
pub struct MaintenanceHandle {
    shutdown_tx: watch::Sender<bool>,
}

impl MaintenanceHandle {
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { shutdown_tx: tx }, rx)
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Default for MaintenanceHandle {
    fn default() -> Self {
        Self::new().0
    }
}
