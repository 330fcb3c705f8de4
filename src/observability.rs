use std::net::SocketAddr;

// ── Admission metrics ───────────────────────────────────────────

/// Counter: reservations admitted.
pub const RESERVATIONS_ADMITTED_TOTAL: &str = "spotbook_reservations_admitted_total";

/// Counter: reservation attempts rejected. Labels: reason.
pub const RESERVATIONS_REJECTED_TOTAL: &str = "spotbook_reservations_rejected_total";

/// Counter: reservations cancelled.
pub const RESERVATIONS_CANCELLED_TOTAL: &str = "spotbook_reservations_cancelled_total";

/// Histogram: `try_reserve` latency in seconds, lock wait included.
pub const ADMISSION_DURATION_SECONDS: &str = "spotbook_admission_duration_seconds";

// ── Storage metrics ─────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "spotbook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "spotbook_wal_flush_batch_size";

/// Counter: completed WAL compactions.
pub const WAL_COMPACTIONS_TOTAL: &str = "spotbook_wal_compactions_total";

/// Install the Prometheus exporter on `port`. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
