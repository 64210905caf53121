//! Balancer - Entry Point
//!
//! Starts the API server and the optional maintenance service with graceful
//! shutdown support.

use std::sync::Arc;

use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use balancer::api::{ApiServer, AppState};
use balancer::arbitration::ArbitrationEngine;
use balancer::clock::{Clock, SystemClock};
use balancer::config::{Config, LogConfig};
use balancer::geo::{GeoLookup, MaxMindGeoLookup, StaticGeoLookup};
use balancer::services::{MaintenanceHandle, MaintenanceService};
use balancer::store::KeyValueStore;

#[tokio::main]
async fn main() -> balancer::Result<()> {
    // Load configuration
    let config = Config::from_env()?;
    init_tracing(&config.log);

    info!("Starting Balancer");

    // Connect to the key-value store
    let store = KeyValueStore::connect(&config.redis).await?;
    info!(prefix = %store.prefix(), ready = store.is_ready(), "Key-value store initialized");

    let geo: Arc<dyn GeoLookup> = match MaxMindGeoLookup::open(&config.geo.db_path).await {
        Ok(reader) => Arc::new(reader),
        Err(e) => {
            warn!(
                path = %config.geo.db_path,
                error = %e,
                "Geo database unavailable, every client resolves to the default country"
            );
            Arc::new(StaticGeoLookup::new())
        }
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let engine = Arc::new(ArbitrationEngine::new(
        store.clone(),
        geo,
        config.arbitration.clone(),
        clock.clone(),
    ));

    // Create shutdown channel
    let (shutdown_tx, _) = watch::channel(false);

    // Start maintenance service
    let (maintenance_handle, maintenance_shutdown) = MaintenanceHandle::new();
    let maintenance_task = if config.maintenance.enabled {
        let service = MaintenanceService::new(store.clone(), &config.maintenance);
        Some(tokio::spawn(async move {
            service.run(maintenance_shutdown).await;
        }))
    } else {
        info!("Maintenance service disabled");
        None
    };

    // Start API server
    let api_server = ApiServer::new(config.server.clone(), AppState::new(engine, clock));
    let api_shutdown = shutdown_tx.subscribe();
    let api_task = tokio::spawn(async move {
        if let Err(e) = api_server.run(api_shutdown).await {
            error!("API server error: {}", e);
        }
    });

    info!("Server started on {}", config.server_addr());

    // Wait for shutdown signal
    shutdown_signal().await;
    info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);
    maintenance_handle.shutdown();

    let _ = api_task.await;
    if let Some(task) = maintenance_task {
        let _ = task.await;
    }

    info!("Balancer stopped");
    Ok(())
}

fn init_tracing(log: &LogConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("balancer={},tower_http=info", log.level).into());

    let registry = tracing_subscriber::registry().with(filter);
    if log.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer().pretty()).init();
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
