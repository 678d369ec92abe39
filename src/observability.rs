use std::net::SocketAddr;

use crate::engine::ReservationError;
use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total statements executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "campsite_queries_total";

/// Histogram: statement latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "campsite_query_duration_seconds";

/// Counter: reservation mutations. Labels: op, status.
pub const RESERVATIONS_TOTAL: &str = "campsite_reservations_total";

/// Counter: optimistic update attempts that lost a race and went again.
pub const UPDATE_RETRIES_TOTAL: &str = "campsite_update_retries_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "campsite_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "campsite_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "campsite_connections_rejected_total";

/// Counter: WAL compactions run. Labels: status.
pub const COMPACTIONS_TOTAL: &str = "campsite_compactions_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "campsite_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "campsite_wal_flush_batch_size";

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

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertReservation { .. } => "insert_reservation",
        Command::UpdateReservation { .. } => "update_reservation",
        Command::DeleteReservation { .. } => "delete_reservation",
        Command::SelectReservations { .. } => "select_reservations",
        Command::SelectAvailability { .. } => "select_availability",
    }
}

/// Status label for an outcome.
pub fn outcome_label<T>(result: &Result<T, ReservationError>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(ReservationError::InvalidRange { .. }) => "invalid_range",
        Err(ReservationError::DatesUnavailable { .. }) => "dates_unavailable",
        Err(ReservationError::NotFound(_)) => "not_found",
        Err(ReservationError::Saving(_)) => "saving",
        Err(ReservationError::Validation(_)) => "validation",
        Err(ReservationError::LimitExceeded(_)) => "limit_exceeded",
    }
}
