use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::Engine;

/// Background task that periodically expires unpaid holds past their expiry.
pub async fn run_sweeper(engine: Arc<Engine>, every: Duration, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                match engine.sweep_expired().await {
                    Ok(0) => {}
                    Ok(n) => debug!("sweeper expired {n} reservation(s)"),
                    Err(e) => warn!("expiry sweep failed: {e}"),
                }
            }
            _ = shutdown.cancelled() => {
                info!("expiry sweeper stopped");
                return;
            }
        }
    }
}

/// Background task that rewrites the WAL once enough appends pile up.
pub async fn run_compactor(
    engine: Arc<Engine>,
    threshold: u64,
    every: Duration,
    shutdown: CancellationToken,
) {
    let mut interval = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let appends = engine.wal_appends_since_compact().await;
                if appends < threshold {
                    continue;
                }
                match engine.compact_wal().await {
                    Ok(()) => info!("compacted WAL after {appends} appends"),
                    Err(e) => warn!("WAL compaction failed: {e}"),
                }
            }
            _ = shutdown.cancelled() => {
                info!("WAL compactor stopped");
                return;
            }
        }
    }
}
