//! Prometheus metrics export
//!
//! Engine call latency, sampled container usage and console sessions.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

use crate::AppState;

static METRICS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install the Prometheus recorder. Safe to call more than once.
pub fn init_metrics() -> anyhow::Result<()> {
    METRICS_HANDLE.get_or_try_init(|| {
        PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Full("dockside_engine_call_duration_seconds".to_string()),
                &[0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0],
            )?
            .install_recorder()
            .map_err(anyhow::Error::from)
    })?;
    Ok(())
}

/// Record one engine round trip
pub fn record_engine_call(operation: &str, duration_secs: f64, success: bool) {
    let outcome = if success { "ok" } else { "error" };
    counter!("dockside_engine_calls_total", "operation" => operation.to_string(), "outcome" => outcome).increment(1);
    histogram!("dockside_engine_call_duration_seconds", "operation" => operation.to_string()).record(duration_secs);
}

/// Record one usage sample. Not labelled by container so series do not outlive removed ones.
pub fn record_container_stats(cpu_percent: f64, memory_bytes: u64) {
    counter!("dockside_stats_samples_total").increment(1);
    histogram!("dockside_container_cpu_percent").record(cpu_percent);
    histogram!("dockside_container_memory_bytes").record(memory_bytes as f64);
}

pub fn record_tty_session_opened() {
    counter!("dockside_tty_sessions_total").increment(1);
    gauge!("dockside_tty_sessions_active").increment(1.0);
}

pub fn record_tty_session_closed() {
    gauge!("dockside_tty_sessions_active").decrement(1.0);
}

/// Prometheus metrics endpoint handler
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    gauge!("dockside_tty_sessions_active").set(state.tty.active_sessions() as f64);
    gauge!("dockside_uptime_seconds").set(state.uptime_seconds() as f64);

    let body = METRICS_HANDLE
        .get()
        .map(PrometheusHandle::render)
        .unwrap_or_default();

    (
        StatusCode::OK,
        [("Content-Type", "text/plain; version=0.0.4")],
        body,
    )
}
