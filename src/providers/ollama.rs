//! Ollama adapter
//!
//! Translates canonical requests into `/api/chat` calls and maps the reply
//! back onto the canonical schema:
//!
//! - `temperature` and `max_tokens` move under `options` (`max_tokens`
//!   becomes `num_predict`), streaming is always off
//! - the reply gets a fresh id and the current timestamp, one choice at
//!   index 0 finishing with `stop` when `done` is set and `length` otherwise
//! - token usage comes from `prompt_eval_count`/`eval_count`, missing
//!   counters count as zero and the total is always recomputed

use super::{
    ProviderAdapter, ProviderError, ProviderId, build_client, join_url, post_json,
};
use crate::error::AppResult;
use crate::schema::{
    ChatRequest, ChatResponse, Choice, FINISH_LENGTH, FINISH_STOP, Message, Usage,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct OllamaChatReply {
    #[serde(default)]
    model: Option<String>,
    message: Message,
    #[serde(default)]
    done: Option<bool>,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
}

fn to_wire(request: &ChatRequest) -> OllamaChatRequest<'_> {
    OllamaChatRequest {
        model: request.model(),
        messages: request.messages(),
        stream: false,
        options: OllamaOptions {
            temperature: request.temperature(),
            num_predict: request.max_tokens(),
        },
    }
}

fn from_wire(reply: OllamaChatReply, requested_model: &str) -> ChatResponse {
    let finish_reason = if reply.done.unwrap_or(false) {
        FINISH_STOP
    } else {
        FINISH_LENGTH
    };

    let usage = Usage::new(
        reply.prompt_eval_count.unwrap_or(0),
        reply.eval_count.unwrap_or(0),
    );

    ChatResponse::new(
        reply.model.unwrap_or_else(|| requested_model.to_string()),
        vec![Choice {
            index: 0,
            message: reply.message,
            finish_reason: finish_reason.to_string(),
        }],
        usage,
    )
}

/// Adapter for `POST {base_url}/api/chat`, unauthenticated
pub struct OllamaAdapter {
    client: reqwest::Client,
    url: String,
}

impl OllamaAdapter {
    pub fn new(base_url: &str) -> AppResult<Self> {
        Ok(Self {
            client: build_client(ProviderId::Ollama)?,
            url: join_url(base_url, "/api/chat"),
        })
    }
}

#[async_trait]
impl ProviderAdapter for OllamaAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Ollama
    }

    async fn generate(
        &self,
        request: &ChatRequest,
        timeout: Duration,
    ) -> Result<ChatResponse, ProviderError> {
        tracing::debug!(
            url = %self.url,
            model = %request.model(),
            message_count = request.messages().len(),
            "Sending request to Ollama backend"
        );

        let body = to_wire(request);
        let bytes = post_json(ProviderId::Ollama, self.client.post(&self.url), &body, timeout).await?;

        let reply: OllamaChatReply =
            serde_json::from_slice(&bytes).map_err(|e| ProviderError::Schema {
                provider: ProviderId::Ollama,
                reason: e.to_string(),
            })?;

        Ok(from_wire(reply, request.model()))
    }
}
