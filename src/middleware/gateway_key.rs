//! Shared-secret authentication
//!
//! When `server.gateway_key` is configured, every request must carry the same
//! value in the `X-Gateway-Key` header. Without a configured key the gateway
//! is open.

use crate::error::AppError;
use crate::handlers::AppState;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};

/// Header carrying the gateway key
pub const GATEWAY_KEY_HEADER: &str = "x-gateway-key";

/// Reject requests whose `X-Gateway-Key` does not match the configured key
pub async fn require_gateway_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.config().server.gateway_key.as_deref() else {
        return next.run(request).await;
    };

    let provided = request
        .headers()
        .get(GATEWAY_KEY_HEADER)
        .and_then(|v| v.to_str().ok());

    if provided.is_some_and(|key| constant_time_eq(key.as_bytes(), expected.as_bytes())) {
        return next.run(request).await;
    }

    tracing::warn!(
        uri = %request.uri(),
        header_present = provided.is_some(),
        "Rejected request with invalid gateway key"
    );
    AppError::Unauthorized.into_response()
}

/// Compare without short-circuiting on the first differing byte
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"secret", b"secret"));
        assert!(!constant_time_eq(b"secret", b"secreT"));
        assert!(!constant_time_eq(b"secret", b"secret2"));
        assert!(constant_time_eq(b"", b""));
    }
}
