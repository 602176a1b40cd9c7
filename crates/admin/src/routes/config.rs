use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::state::SharedState;

/// GET /api/config
///
/// Returns the running configuration as JSON, with secrets masked.
pub async fn get_config(State(state): State<SharedState>) -> impl IntoResponse {
    match serde_json::to_value(state.config.redacted()) {
        Ok(value) => (StatusCode::OK, Json(value)),
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize configuration");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "serialization failed" })),
            )
        }
    }
}
