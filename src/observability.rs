use std::net::SocketAddr;

// ── Bookings ────────────────────────────────────────────────────

/// Counter: booking-flow results. Labels: operation, outcome.
pub const BOOKINGS_TOTAL: &str = "slotkeep_bookings_total";

/// Histogram: end-to-end booking-flow latency in seconds. Labels: operation.
pub const BOOKING_DURATION_SECONDS: &str = "slotkeep_booking_duration_seconds";

/// Counter: fresh calendar checks. Labels: outcome.
pub const AVAILABILITY_CHECKS_TOTAL: &str = "slotkeep_availability_checks_total";

/// Histogram: fresh calendar check latency in seconds.
pub const AVAILABILITY_CHECK_SECONDS: &str = "slotkeep_availability_check_seconds";

/// Counter: failed post-commit side effects. Labels: effect.
pub const SIDE_EFFECT_FAILURES_TOTAL: &str = "slotkeep_side_effect_failures_total";

// ── Resilience ──────────────────────────────────────────────────

/// Counter: breaker state changes. Labels: breaker, to.
pub const BREAKER_TRANSITIONS_TOTAL: &str = "slotkeep_breaker_transitions_total";

/// Counter: calls rejected by an open breaker. Labels: breaker.
pub const BREAKER_REJECTIONS_TOTAL: &str = "slotkeep_breaker_rejections_total";

/// Gauge: 0 closed, 1 half-open, 2 open. Labels: breaker.
pub const BREAKER_STATE: &str = "slotkeep_breaker_state";

/// Counter: retries scheduled after a transient failure.
pub const RETRY_ATTEMPTS_TOTAL: &str = "slotkeep_retry_attempts_total";

/// Counter: operations that used up every attempt.
pub const RETRY_EXHAUSTED_TOTAL: &str = "slotkeep_retry_exhausted_total";

// ── Store ───────────────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "slotkeep_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (records per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "slotkeep_wal_flush_batch_size";

/// Counter: writes refused because the slot is held.
pub const STORE_CONFLICTS_TOTAL: &str = "slotkeep_store_conflicts_total";

/// Counter: jobs committed. Labels: queue.
pub const JOBS_ENQUEUED_TOTAL: &str = "slotkeep_jobs_enqueued_total";

/// Counter: enqueues absorbed by an existing job. Labels: queue.
pub const JOBS_DEDUPLICATED_TOTAL: &str = "slotkeep_jobs_deduplicated_total";

/// Install the Prometheus exporter on `port`. No-op if `port` is `None`.
pub fn init_metrics(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Install a fmt subscriber filtered by `RUST_LOG`. Safe to call twice.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}
