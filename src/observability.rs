use std::net::SocketAddr;

// ── Booking path ────────────────────────────────────────────────

/// Counter: reservations committed.
pub const RESERVATIONS_CREATED_TOTAL: &str = "slotguard_reservations_created_total";

/// Counter: create requests rejected because the window was taken.
pub const OVERLAP_CONFLICTS_TOTAL: &str = "slotguard_overlap_conflicts_total";

/// Counter: status transitions committed. Labels: to.
pub const STATUS_TRANSITIONS_TOTAL: &str = "slotguard_status_transitions_total";

/// Counter: reservations moved to expired by the sweeper.
pub const EXPIRED_SWEPT_TOTAL: &str = "slotguard_expired_swept_total";

/// Histogram: create_reservation latency in seconds. Labels: outcome.
pub const CREATE_DURATION_SECONDS: &str = "slotguard_create_duration_seconds";

/// Counter: notification dispatches that failed (swallowed).
pub const NOTIFICATION_FAILURES_TOTAL: &str = "slotguard_notification_failures_total";

// ── Validation path ─────────────────────────────────────────────

/// Histogram: validate_draft latency in seconds.
pub const VALIDATION_DURATION_SECONDS: &str = "slotguard_validation_duration_seconds";

/// Counter: validations cut off by the global deadline.
pub const VALIDATION_TIMEOUTS_TOTAL: &str = "slotguard_validation_timeouts_total";

/// Counter: availability probes that returned an optimistic pass.
pub const PROBE_OPTIMISTIC_TOTAL: &str = "slotguard_probe_optimistic_total";

/// Counter: validation cache hits / misses.
pub const CACHE_HITS_TOTAL: &str = "slotguard_cache_hits_total";
pub const CACHE_MISSES_TOTAL: &str = "slotguard_cache_misses_total";

// ── Storage ─────────────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "slotguard_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (commits per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "slotguard_wal_flush_batch_size";

/// Counter: WAL group commits that failed and were rolled back.
pub const WAL_COMMIT_FAILURES_TOTAL: &str = "slotguard_wal_commit_failures_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
