use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use slotguard::clock::SystemClock;
use slotguard::collaborators::{Collaborators, FlatRatePricing, InMemoryCatalog, InMemoryDirectory};
use slotguard::config::Config;
use slotguard::engine::Engine;
use slotguard::notify::NotifyHub;
use slotguard::reaper;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    slotguard::observability::init(config.metrics_port)?;

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;

    let catalog = Arc::new(InMemoryCatalog::new());
    if let Some(seed) = &config.catalog_seed {
        let n = catalog.load_json(seed)?;
        info!("loaded {n} catalog entries from {}", seed.display());
    }
    let collaborators = Collaborators {
        catalog,
        requesters: Arc::new(InMemoryDirectory::new()),
        pricing: Arc::new(FlatRatePricing),
        notifier: Arc::new(NotifyHub::new()),
    };

    let wal_path = config.wal_path();
    let engine = Arc::new(Engine::new(
        wal_path.clone(),
        collaborators,
        Arc::new(SystemClock),
        config.policy,
    )?);
    info!("slotguard started");
    info!("  wal: {}", wal_path.display());
    info!("  hold ttl: {}s", config.policy.hold_ttl_ms / 1000);
    info!("  sweep interval: {:?}", config.sweep_interval);
    info!("  compact threshold: {}", config.compact_threshold);
    info!("  metrics: {}", config.metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    let shutdown = CancellationToken::new();
    let sweeper = tokio::spawn(reaper::run_sweeper(
        engine.clone(),
        config.sweep_interval,
        shutdown.clone(),
    ));
    let compactor = tokio::spawn(reaper::run_compactor(
        engine.clone(),
        config.compact_threshold,
        Duration::from_secs(30),
        shutdown.clone(),
    ));

    wait_for_signal().await;
    info!("shutdown signal received");
    shutdown.cancel();
    let _ = tokio::join!(sweeper, compactor);

    info!("slotguard stopped");
    Ok(())
}

async fn wait_for_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!("failed to register SIGTERM handler: {e}");
                ctrl_c.await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
