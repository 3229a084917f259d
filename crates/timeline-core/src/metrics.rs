//! Prometheus metrics helpers for the timeline crates.
//!
//! # Usage
//!
//! ```rust,ignore
//! use timeline_core::metrics::{init_metrics, start_metrics_server};
//!
//! let handle = init_metrics();
//! start_metrics_server(9090, handle).await?;
//!
//! metrics::counter!("history_events_total").increment(1);
//! ```
//!
//! # Metric Naming Conventions
//!
//! - Prefix: component (`scheduler_`, `pipeline_`, `history_`, `convert_`)
//! - Suffix: unit or type (`_total`, `_seconds`)
//! - Labels: sparingly (stage names, dimensions)

use axum::{Router, routing::get};
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if a recorder is already installed.
pub fn init_metrics() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus recorder");

    register_common_metrics();

    handle
}

/// Like [`init_metrics`] but returns `None` if a recorder is already installed.
pub fn try_init_metrics() -> Option<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder().ok()?;
    register_common_metrics();
    Some(handle)
}

/// Serve `/metrics` on the given port from a background task.
///
/// The listener is bound before returning, so a port conflict is reported to
/// the caller instead of failing inside the task.
pub async fn start_metrics_server(
    port: u16,
    handle: PrometheusHandle,
) -> Result<(), std::io::Error> {
    let app = Router::new().route(
        "/metrics",
        get(move || {
            let handle = handle.clone();
            async move { handle.render() }
        }),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Metrics server listening on http://{}/metrics", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("Metrics server stopped: {}", e);
        }
    });

    Ok(())
}

/// Register descriptions for the metrics recorded by the timeline crates.
fn register_common_metrics() {
    // =========================================================================
    // Scheduler
    // =========================================================================

    describe_counter!(
        "scheduler_tasks_started_total",
        "Tasks admitted past the concurrency and rate gates"
    );
    describe_counter!(
        "scheduler_tasks_failed_total",
        "Scheduled tasks that returned an error"
    );
    describe_gauge!("scheduler_tasks_running", "Tasks currently executing");

    // =========================================================================
    // Pipeline
    // =========================================================================

    describe_gauge!("pipeline_progress", "Fraction of selected stages completed");
    describe_counter!(
        "pipeline_stage_failures_total",
        "Stages that aborted a pipeline run (label: stage)"
    );

    // =========================================================================
    // History reconstruction
    // =========================================================================

    describe_counter!(
        "history_events_total",
        "Change events fed into reconstruction"
    );
    describe_counter!(
        "history_events_skipped_total",
        "Change events skipped as malformed"
    );
    describe_counter!(
        "history_events_out_of_order_total",
        "Change events older than the previous event of the same entity"
    );
    describe_counter!(
        "history_intervals_closed_total",
        "Closed intervals persisted (label: dimension)"
    );
    describe_counter!(
        "history_memberships_written_total",
        "Membership records written after reconciliation"
    );

    // =========================================================================
    // Domain conversion
    // =========================================================================

    describe_counter!(
        "convert_rows_total",
        "Canonical rows upserted by domain converters (label: converter)"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Once;

    static INIT: Once = Once::new();

    fn ensure_metrics_init() {
        INIT.call_once(|| {
            let _ = try_init_metrics();
        });
    }

    #[test]
    fn test_try_init_metrics_idempotent() {
        let handle1 = try_init_metrics();
        let handle2 = try_init_metrics();
        assert!(handle1.is_none() || handle2.is_none());
    }

    #[test]
    fn test_register_common_metrics_does_not_panic() {
        ensure_metrics_init();
        register_common_metrics();
        register_common_metrics();
    }

    #[test]
    fn test_recording_after_init_does_not_panic() {
        ensure_metrics_init();
        metrics::counter!("history_events_total").increment(3);
        metrics::gauge!("pipeline_progress").set(0.5);
    }
}
