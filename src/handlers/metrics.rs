//! Prometheus metrics endpoint
//!
//! Exposes metrics in Prometheus text format for scraping.

use axum::{
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};

use crate::handlers::AppState;

/// Metrics handler for Prometheus scraping
///
/// # Response
///
/// - `200 OK` with metrics in Prometheus text format
/// - `500 Internal Server Error` if encoding fails
///
/// # Example
///
/// ```bash
/// curl http://localhost:8000/metrics
/// # HELP modelgate_requests_total Total number of chat completion requests by provider and outcome
/// # TYPE modelgate_requests_total counter
/// modelgate_requests_total{outcome="success",provider="openai"} 42
/// ```
pub async fn handler(State(state): State<AppState>) -> Response {
    match state.metrics().gather() {
        Ok(output) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            output,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to gather metrics for Prometheus scraping");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to gather metrics: {}", e),
            )
                .into_response()
        }
    }
}
