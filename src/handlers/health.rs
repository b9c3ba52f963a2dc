//! Health check endpoint
//!
//! Liveness only; backends are not contacted.

use axum::Json;
use serde::Serialize;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Health check handler
pub async fn handler() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}
