//! Provider adapters
//!
//! Each adapter translates between the canonical schema and one backend's
//! wire protocol. Adapters make exactly one HTTP attempt per call; retrying
//! on another backend is the orchestrator's job.

pub mod ollama;
pub mod openai;

pub use ollama::OllamaAdapter;
pub use openai::OpenAiAdapter;

use crate::config::Config;
use crate::error::AppResult;
use crate::schema::{ChatRequest, ChatResponse};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Maximum characters of a backend error body kept in a [`ProviderError`]
const MAX_ERROR_BODY_CHARS: usize = 512;

/// Backend family serving a model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    /// OpenAI-compatible `/chat/completions` API
    OpenAi,
    /// Ollama `/api/chat` API
    Ollama,
}

impl ProviderId {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Ollama => "ollama",
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse classification of a provider failure, used for logs and metric labels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    Transport,
    Timeout,
    Http,
    Schema,
}

impl ProviderErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::Timeout => "timeout",
            Self::Http => "http",
            Self::Schema => "schema",
        }
    }
}

/// Failure of a single adapter call
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("{provider}: connection failed: {reason}")]
    Transport { provider: ProviderId, reason: String },

    #[error("{provider}: request timed out after {timeout_ms}ms")]
    Timeout { provider: ProviderId, timeout_ms: u64 },

    #[error("{provider}: backend returned HTTP {status}: {body}")]
    Http {
        provider: ProviderId,
        status: u16,
        body: String,
    },

    #[error("{provider}: response does not match the chat completion schema: {reason}")]
    Schema { provider: ProviderId, reason: String },
}

impl ProviderError {
    pub fn kind(&self) -> ProviderErrorKind {
        match self {
            Self::Transport { .. } => ProviderErrorKind::Transport,
            Self::Timeout { .. } => ProviderErrorKind::Timeout,
            Self::Http { .. } => ProviderErrorKind::Http,
            Self::Schema { .. } => ProviderErrorKind::Schema,
        }
    }

    pub fn provider(&self) -> ProviderId {
        match self {
            Self::Transport { provider, .. }
            | Self::Timeout { provider, .. }
            | Self::Http { provider, .. }
            | Self::Schema { provider, .. } => *provider,
        }
    }

    pub(crate) fn timeout(provider: ProviderId, timeout: Duration) -> Self {
        Self::Timeout {
            provider,
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    fn from_reqwest(provider: ProviderId, err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            Self::timeout(provider, timeout)
        } else {
            Self::Transport {
                provider,
                reason: err.to_string(),
            }
        }
    }
}

/// Capability shared by every backend
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Which backend family this adapter talks to
    fn id(&self) -> ProviderId;

    /// Generate one completion
    ///
    /// `timeout` bounds the whole HTTP exchange; exceeding it is reported as
    /// [`ProviderError::Timeout`].
    async fn generate(
        &self,
        request: &ChatRequest,
        timeout: Duration,
    ) -> Result<ChatResponse, ProviderError>;
}

/// One adapter per provider id
///
/// Construct with [`ProviderRegistry::from_config`] in production or
/// [`ProviderRegistry::new`] to inject test doubles.
#[derive(Clone)]
pub struct ProviderRegistry {
    openai: Arc<dyn ProviderAdapter>,
    ollama: Arc<dyn ProviderAdapter>,
}

impl ProviderRegistry {
    pub fn new(openai: Arc<dyn ProviderAdapter>, ollama: Arc<dyn ProviderAdapter>) -> Self {
        Self { openai, ollama }
    }

    /// Build the HTTP adapters described by `config.providers`
    pub fn from_config(config: &Config) -> AppResult<Self> {
        let openai = OpenAiAdapter::new(
            &config.providers.openai.base_url,
            config.providers.openai.api_key(),
        )?;
        let ollama = OllamaAdapter::new(&config.providers.ollama.base_url)?;
        Ok(Self::new(Arc::new(openai), Arc::new(ollama)))
    }

    pub fn get(&self, id: ProviderId) -> Arc<dyn ProviderAdapter> {
        match id {
            ProviderId::OpenAi => self.openai.clone(),
            ProviderId::Ollama => self.ollama.clone(),
        }
    }
}

/// POST a JSON body and return the raw reply of a 2xx response
async fn post_json<B: Serialize + ?Sized>(
    provider: ProviderId,
    request: reqwest::RequestBuilder,
    body: &B,
    timeout: Duration,
) -> Result<Vec<u8>, ProviderError> {
    let response = request
        .timeout(timeout)
        .json(body)
        .send()
        .await
        .map_err(|e| ProviderError::from_reqwest(provider, e, timeout))?;

    let status = response.status();
    let bytes = response
        .bytes()
        .await
        .map_err(|e| ProviderError::from_reqwest(provider, e, timeout))?;

    if !status.is_success() {
        let body = String::from_utf8_lossy(&bytes);
        return Err(ProviderError::Http {
            provider,
            status: status.as_u16(),
            body: truncate_chars(&body, MAX_ERROR_BODY_CHARS),
        });
    }

    Ok(bytes.to_vec())
}

fn build_client(provider: ProviderId) -> AppResult<reqwest::Client> {
    reqwest::Client::builder().build().map_err(|e| {
        crate::error::AppError::Internal(format!(
            "Failed to build HTTP client for {}: {}",
            provider, e
        ))
    })
}

fn join_url(base_url: &str, path: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), path)
}

/// Truncate to at most `max_chars` characters without splitting a code point
fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => format!("{}...", &text[..byte_index]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_id_serde() {
        assert_eq!(
            serde_json::from_str::<ProviderId>(r#""openai""#).unwrap(),
            ProviderId::OpenAi
        );
        assert_eq!(
            serde_json::from_str::<ProviderId>(r#""ollama""#).unwrap(),
            ProviderId::Ollama
        );
        assert_eq!(serde_json::to_string(&ProviderId::OpenAi).unwrap(), r#""openai""#);
    }

    #[test]
    fn test_provider_error_kind_and_provider() {
        let err = ProviderError::Http {
            provider: ProviderId::Ollama,
            status: 503,
            body: "overloaded".to_string(),
        };
        assert_eq!(err.kind(), ProviderErrorKind::Http);
        assert_eq!(err.provider(), ProviderId::Ollama);
        assert_eq!(
            err.to_string(),
            "ollama: backend returned HTTP 503: overloaded"
        );
    }

    #[test]
    fn test_timeout_error_reports_millis() {
        let err = ProviderError::timeout(ProviderId::OpenAi, Duration::from_secs(2));
        assert_eq!(err.to_string(), "openai: request timed out after 2000ms");
        assert_eq!(err.kind().as_str(), "timeout");
    }

    #[test]
    fn test_truncate_chars_respects_utf8_boundaries() {
        let text = "héllo wörld";
        assert_eq!(truncate_chars(text, 4), "héll...");
        assert_eq!(truncate_chars(text, 100), text);
        assert_eq!(truncate_chars("", 3), "");
    }

    #[test]
    fn test_join_url_strips_trailing_slash() {
        assert_eq!(
            join_url("http://localhost:11434/", "/api/chat"),
            "http://localhost:11434/api/chat"
        );
        assert_eq!(
            join_url("https://api.openai.com/v1", "/chat/completions"),
            "https://api.openai.com/v1/chat/completions"
        );
    }
}
