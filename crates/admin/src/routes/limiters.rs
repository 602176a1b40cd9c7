use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::state::SharedState;

#[derive(Debug, Deserialize)]
pub struct LimiterQuery {
    /// Registry key, e.g. `1.2.3.0/24` or `1.2.3.0/24:atom`.
    pub network: Option<String>,
}

/// GET /api/limiters
///
/// Registry totals, or a single limiter when `?network=` is given.
pub async fn get_limiters(
    State(state): State<SharedState>,
    Query(query): Query<LimiterQuery>,
) -> impl IntoResponse {
    let Some(gate) = state.gate.as_ref() else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "limiter is disabled" })),
        );
    };

    if let Some(network) = query.network.as_deref() {
        return match gate.registry().snapshot(network) {
            Some(snapshot) => (StatusCode::OK, Json(json!(snapshot))),
            None => (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": format!("no limiter for {network}") })),
            ),
        };
    }

    let stats = gate.registry().stats();
    (
        StatusCode::OK,
        Json(json!({
            "networks": stats.networks,
            "suspicious_networks": stats.suspicious_networks,
            "feed_limiters": stats.feed_limiters,
            "link_tokens": gate.link_tokens().len(),
            "detection_method": gate.config().detection_method,
        })),
    )
}
