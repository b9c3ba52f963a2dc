//! Chat completion endpoint
//!
//! Handles `POST /v1/chat/completions` with an OpenAI-shaped body. Malformed
//! or invalid bodies are rejected with 400 before routing; validation lives in
//! `ChatRequest`'s `Deserialize` impl.

use crate::error::{AppError, AppResult};
use crate::handlers::AppState;
use crate::middleware::RequestId;
use crate::schema::{ChatRequest, ChatResponse};
use axum::{
    Extension, Json,
    extract::{State, rejection::JsonRejection},
    http::{HeaderMap, HeaderName, HeaderValue},
};

/// Provider that served the response
pub const PROVIDER_HEADER: HeaderName = HeaderName::from_static("x-modelgate-provider");
/// `hit` or `miss`
pub const CACHE_HEADER: HeaderName = HeaderName::from_static("x-modelgate-cache");
/// `true` when a fallback provider served the response
pub const FALLBACK_HEADER: HeaderName = HeaderName::from_static("x-modelgate-fallback");

/// Chat completion handler
pub async fn handler(
    State(state): State<AppState>,
    request_id: Option<Extension<RequestId>>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> AppResult<(HeaderMap, Json<ChatResponse>)> {
    let request_id = request_id.map(|Extension(id)| id).unwrap_or_default();

    let Json(request) = payload.map_err(|rejection| {
        tracing::debug!(
            request_id = %request_id,
            error = %rejection.body_text(),
            "Rejected invalid chat request"
        );
        AppError::Validation(rejection.body_text())
    })?;

    tracing::debug!(
        request_id = %request_id,
        model = %request.model(),
        messages = request.messages().len(),
        "Received chat request"
    );

    let completion = state.orchestrator().handle(request).await?;

    let mut headers = HeaderMap::new();
    headers.insert(
        PROVIDER_HEADER,
        HeaderValue::from_static(completion.provider.as_str()),
    );
    headers.insert(
        CACHE_HEADER,
        HeaderValue::from_static(if completion.cache_hit { "hit" } else { "miss" }),
    );
    headers.insert(
        FALLBACK_HEADER,
        HeaderValue::from_static(if completion.fallback_used {
            "true"
        } else {
            "false"
        }),
    );

    Ok((headers, Json(completion.response)))
}
