use crate::api::schemas::health::HealthResponse;
use axum::Json;

/// Liveness check: always 200 with the fixed payload.
pub async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse::default())
}
