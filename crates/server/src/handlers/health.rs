//! Health probes.

use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde::Serialize;

/// Probe response body.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// GET /healthz, /healthz/liveness - the process is up and serving.
pub async fn liveness() -> Json<HealthResponse> {
    Json(HealthResponse { status: "UP" })
}

/// GET /healthz/readiness - the metadata store answers.
pub async fn readiness(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    match state.metadata.health_check().await {
        Ok(()) => (StatusCode::OK, Json(HealthResponse { status: "UP" })),
        Err(e) => {
            tracing::error!(error = %e, "Readiness check failed to reach the metadata store");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse { status: "DOWN" }),
            )
        }
    }
}
