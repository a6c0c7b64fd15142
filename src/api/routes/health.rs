//! Health check endpoint

use axum::{Json, extract::State, http::StatusCode};

use crate::api::{state::ApiState, types::HealthResponse};

/// GET /ping
///
/// 200 when the storage backend answers its probe, 500 otherwise
pub async fn ping(State(state): State<ApiState>) -> (StatusCode, Json<HealthResponse>) {
    let healthy = state.service.health_check().await;

    let (status, label) = if healthy {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, "unavailable")
    };

    (
        status,
        Json(HealthResponse {
            status: label.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }),
    )
}
