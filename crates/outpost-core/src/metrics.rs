//! Prometheus metrics for the Outpost sync engines.
//!
//! # Usage
//!
//! ```rust,ignore
//! use outpost_core::metrics::{init_metrics, start_metrics_server};
//!
//! let handle = init_metrics();
//! start_metrics_server(9090, handle).await?;
//!
//! metrics::counter!("backfill_windows_total").increment(1);
//! ```
//!
//! # Metric Naming Conventions
//!
//! - Prefix: engine name (`backfill_`, `merge_`, `live_`, `store_`)
//! - Suffix: `_total` for counters, no suffix for gauges
//! - Labels: `partition` (outbox/inbox) and `kind` only

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

    register_metrics();

    handle
}

/// Like [`init_metrics`] but returns `None` if a recorder is already installed.
pub fn try_init_metrics() -> Option<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder().ok()?;
    register_metrics();
    Some(handle)
}

/// Serve `/metrics` on `port` from a background task.
///
/// The listener is bound before returning so a port conflict is reported to
/// the caller instead of being lost inside the task.
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

fn register_metrics() {
    // =========================================================================
    // Outbox backfill
    // =========================================================================

    describe_counter!("backfill_windows_total", "Backfill windows processed");
    describe_counter!(
        "backfill_windows_partial_total",
        "Backfill windows cut short by a fetch error or deadline"
    );
    describe_counter!(
        "backfill_events_received_total",
        "Events received from relays during backfill"
    );
    describe_counter!(
        "backfill_events_stored_total",
        "New events written to the outbox during backfill"
    );
    describe_gauge!(
        "backfill_running",
        "Whether an outbox backfill is running (1=yes, 0=no)"
    );

    // =========================================================================
    // Inbox merge
    // =========================================================================

    describe_counter!(
        "merge_events_received_total",
        "Events received during the tagged inbox merge"
    );
    describe_counter!(
        "merge_events_accepted_total",
        "Events accepted into the inbox during the tagged merge"
    );
    describe_counter!(
        "merge_events_rejected_total",
        "Events rejected during the tagged merge (label: reason)"
    );

    // =========================================================================
    // Live inbox
    // =========================================================================

    describe_counter!("live_events_received_total", "Events received on the live inbox");
    describe_counter!(
        "live_events_accepted_total",
        "Events accepted into the inbox from the live subscription"
    );
    describe_counter!(
        "live_events_rejected_total",
        "Live events rejected (label: reason)"
    );
    describe_counter!(
        "live_notifications_total",
        "Inbox notifications emitted (label: kind)"
    );
    describe_counter!(
        "live_resubscribes_total",
        "Live subscriptions re-opened after the stream closed or failed"
    );
    describe_counter!(
        "live_notifications_lagged_total",
        "Relay pool notifications dropped because the live receiver fell behind"
    );
    describe_gauge!(
        "live_subscribed",
        "Whether the live inbox subscription is open (1=yes, 0=no)"
    );

    // =========================================================================
    // Stores
    // =========================================================================

    describe_counter!(
        "store_events_duplicate_total",
        "Publishes that hit an event already in the store (label: partition)"
    );
    describe_counter!(
        "store_publish_failures_total",
        "Publishes that failed (label: partition)"
    );
}
