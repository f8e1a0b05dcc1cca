//! Prometheus metrics for the booking worker.
//!
//! Counters are emitted with the `metrics` facade throughout the workspace;
//! this module installs the Prometheus recorder that collects them.

use metrics::describe_counter;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use thiserror::Error;

/// Errors from metrics setup
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to install the Prometheus exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Install the Prometheus recorder.
///
/// With `listen` set, an HTTP scrape endpoint is served on that address and no
/// handle is returned. Without it, the returned handle renders the metrics text
/// on demand.
///
/// # Errors
///
/// Returns [`MetricsError::Install`] if a recorder is already installed or the
/// listener cannot bind.
pub fn install(listen: Option<SocketAddr>) -> Result<Option<PrometheusHandle>, MetricsError> {
    describe_metrics();

    let builder = PrometheusBuilder::new();
    match listen {
        Some(addr) => {
            builder
                .with_http_listener(addr)
                .install()
                .map_err(|e| MetricsError::Install(e.to_string()))?;
            tracing::info!(%addr, "Metrics endpoint listening");
            Ok(None)
        }
        None => builder
            .install_recorder()
            .map(Some)
            .map_err(|e| MetricsError::Install(e.to_string())),
    }
}

fn describe_metrics() {
    describe_counter!("jobs_enqueued_total", "Jobs accepted by the dispatcher");
    describe_counter!("jobs_enqueue_failed_total", "Jobs that could not be enqueued");
    describe_counter!("jobs_succeeded_total", "Jobs that completed");
    describe_counter!("jobs_failed_total", "Jobs dropped after exhausting retries");
    describe_counter!("periodic_runs_total", "Runs of periodic background tasks");
    describe_counter!("tickets_reserved_total", "Reservations created");
    describe_counter!("tickets_confirmed_total", "Reservations paid");
    describe_counter!("tickets_expired_total", "Reservations expired");
    describe_counter!("tickets_cancelled_total", "Tickets cancelled");
    describe_counter!("seat_conflicts_total", "Reservations rejected because the seat was taken");
    describe_counter!("reminders_sent_total", "Trip reminders enqueued");
    describe_counter!("sweep_failures_total", "Tickets a sweep could not process");
    describe_counter!("store_version_conflicts_total", "Writes rejected by the version check");
}
