//! OpenAI-compatible adapter
//!
//! The canonical schema is already OpenAI-shaped, so the request is forwarded
//! verbatim and the reply is validated directly against [`ChatResponse`].
//! Anything that does not fit is a [`ProviderError::Schema`], never coerced.

use super::{
    ProviderAdapter, ProviderError, ProviderId, build_client, join_url, post_json,
};
use crate::error::AppResult;
use crate::schema::{ChatRequest, ChatResponse};
use async_trait::async_trait;
use std::time::Duration;

/// Adapter for `POST {base_url}/chat/completions` with bearer auth
pub struct OpenAiAdapter {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

impl OpenAiAdapter {
    pub fn new(base_url: &str, api_key: Option<String>) -> AppResult<Self> {
        if api_key.is_none() {
            tracing::warn!(
                base_url = %base_url,
                "No API key configured for the OpenAI provider; requests will be sent without credentials"
            );
        }

        Ok(Self {
            client: build_client(ProviderId::OpenAi)?,
            url: join_url(base_url, "/chat/completions"),
            api_key,
        })
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::OpenAi
    }

    async fn generate(
        &self,
        request: &ChatRequest,
        timeout: Duration,
    ) -> Result<ChatResponse, ProviderError> {
        let mut builder = self.client.post(&self.url);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        tracing::debug!(
            url = %self.url,
            model = %request.model(),
            message_count = request.messages().len(),
            "Sending request to OpenAI-compatible backend"
        );

        let bytes = post_json(ProviderId::OpenAi, builder, request, timeout).await?;

        serde_json::from_slice::<ChatResponse>(&bytes).map_err(|e| ProviderError::Schema {
            provider: ProviderId::OpenAi,
            reason: e.to_string(),
        })
    }
}
