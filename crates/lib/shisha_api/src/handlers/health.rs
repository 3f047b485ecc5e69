//! Liveness endpoint.

use axum::Json;

use crate::models::HealthResponse;

/// `GET /health`: reports that the API process is up.
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        message: format!("Shisha API v{} is running", shisha_core::version()),
    })
}
