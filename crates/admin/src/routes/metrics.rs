use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{Encoder, TextEncoder};

use crate::state::SharedState;

/// GET /api/metrics
///
/// Prometheus text exposition. Registry gauges are sampled at scrape time.
pub async fn get_metrics(State(state): State<SharedState>) -> impl IntoResponse {
    let metrics = &state.metrics;
    if let Some(gate) = state.gate.as_ref() {
        let stats = gate.registry().stats();
        metrics.tracked_networks.set(stats.networks as i64);
        metrics.suspicious_networks.set(stats.suspicious_networks as i64);
        metrics.live_link_tokens.set(gate.link_tokens().len() as i64);
    }

    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metrics.registry.gather(), &mut buffer) {
        tracing::error!(error = %e, "failed to encode prometheus metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("failed to encode metrics: {e}"),
        );
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        String::from_utf8_lossy(&buffer).into_owned(),
    )
}
