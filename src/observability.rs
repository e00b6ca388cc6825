use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "allocd_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "allocd_query_duration_seconds";

// ── Domain metrics ──────────────────────────────────────────────

/// Counter: committed state transitions. Labels: entity, transition.
pub const TRANSITIONS_TOTAL: &str = "allocd_transitions_total";

/// Counter: requests turned away by an overlapping approved reservation.
/// Labels: stage (create, approve).
pub const CONFLICTS_TOTAL: &str = "allocd_conflicts_total";

/// Counter: rental requests turned away for lack of stock. Labels: stage.
pub const STOCK_SHORTFALLS_TOTAL: &str = "allocd_stock_shortfalls_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "allocd_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "allocd_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "allocd_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "allocd_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "allocd_wal_flush_batch_size";

/// Counter: completed WAL compactions.
pub const WAL_COMPACTIONS_TOTAL: &str = "allocd_wal_compactions_total";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
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
        Command::UpsertFacility { .. } => "upsert_facility",
        Command::UpsertItem { .. } => "upsert_item",
        Command::InsertReservation(_) => "insert_reservation",
        Command::DecideReservation { .. } => "decide_reservation",
        Command::DeleteReservation { .. } => "delete_reservation",
        Command::InsertRental(_) => "insert_rental",
        Command::DecideRental { .. } => "decide_rental",
        Command::DeleteRental { .. } => "delete_rental",
        Command::SelectReservations(_) => "select_reservations",
        Command::SelectRentals(_) => "select_rentals",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectFreeWindows { .. } => "select_free_windows",
        Command::SelectStock { .. } => "select_stock",
        Command::SelectFacilities => "select_facilities",
        Command::SelectItems => "select_items",
    }
}
