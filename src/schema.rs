//! Canonical chat-completion schema
//!
//! Provider-agnostic request and response types every other component speaks.
//! Validation is enforced during deserialization - invalid instances cannot exist.

use serde::{Deserialize, Deserializer, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Model name that asks the router to pick a concrete model
pub const AUTO_MODEL: &str = "auto";

/// Object type for non-streaming chat completion responses
pub const OBJECT_CHAT_COMPLETION: &str = "chat.completion";

/// Finish reason for a completion the backend ended on its own
pub const FINISH_STOP: &str = "stop";

/// Finish reason for a completion cut off by the token limit
pub const FINISH_LENGTH: &str = "length";

const DEFAULT_TEMPERATURE: f64 = 0.7;
const DEFAULT_MAX_TOKENS: u32 = 500;

/// A single chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    role: String,
    content: String,
}

impl Message {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }

    /// Shorthand for a `user` message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }
}

/// Chat completion request in canonical form
///
/// `max_tokens` defaults to 500 when the field is absent; an explicit `null`
/// leaves it unset. Serialization omits unset optional fields so the struct
/// can be forwarded verbatim to OpenAI-compatible backends.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

impl ChatRequest {
    /// Create a request for `messages` with every other field at its default
    ///
    /// Unlike deserialization this does not validate; requests arriving over
    /// HTTP are checked in `Deserialize`.
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            model: AUTO_MODEL.to_string(),
            messages,
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: Some(DEFAULT_MAX_TOKENS),
            stream: false,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    pub fn max_tokens(&self) -> Option<u32> {
        self.max_tokens
    }

    pub fn stream(&self) -> bool {
        self.stream
    }

    /// Whether the caller left model selection to the router
    pub fn is_auto(&self) -> bool {
        self.model == AUTO_MODEL
    }

    /// Replace the requested model with the router's resolved model
    pub(crate) fn resolve_model(&mut self, model: impl Into<String>) {
        self.model = model.into();
    }

    /// Streaming is not supported; every request is dispatched non-streaming.
    ///
    /// Returns whether the caller had asked for streaming.
    pub(crate) fn disable_streaming(&mut self) -> bool {
        std::mem::replace(&mut self.stream, false)
    }
}

fn validate_request_fields(
    messages: &[Message],
    temperature: f64,
    max_tokens: Option<u32>,
) -> Result<(), String> {
    if messages.is_empty() {
        return Err("messages array cannot be empty".to_string());
    }

    if !temperature.is_finite() {
        return Err("temperature must be a finite number".to_string());
    }
    if !(0.0..=2.0).contains(&temperature) {
        return Err("temperature must be between 0.0 and 2.0".to_string());
    }

    if max_tokens == Some(0) {
        return Err("max_tokens must be greater than 0".to_string());
    }

    Ok(())
}

impl<'de> Deserialize<'de> for ChatRequest {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct RawChatRequest {
            #[serde(default = "default_model")]
            model: String,
            messages: Vec<Message>,
            #[serde(default)]
            temperature: Option<f64>,
            #[serde(default = "default_max_tokens")]
            max_tokens: Option<u32>,
            #[serde(default)]
            stream: Option<bool>,
        }

        fn default_model() -> String {
            AUTO_MODEL.to_string()
        }

        fn default_max_tokens() -> Option<u32> {
            Some(DEFAULT_MAX_TOKENS)
        }

        let raw = RawChatRequest::deserialize(deserializer)?;
        let temperature = raw.temperature.unwrap_or(DEFAULT_TEMPERATURE);

        validate_request_fields(&raw.messages, temperature, raw.max_tokens)
            .map_err(serde::de::Error::custom)?;

        Ok(ChatRequest {
            model: raw.model,
            messages: raw.messages,
            temperature,
            max_tokens: raw.max_tokens,
            stream: raw.stream.unwrap_or(false),
        })
    }
}

/// One completion alternative
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Choice {
    pub index: u32,
    pub message: Message,
    pub finish_reason: String,
}

impl<'de> Deserialize<'de> for Choice {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct RawChoice {
            index: u32,
            message: Message,
            #[serde(default)]
            finish_reason: Option<String>,
        }

        let raw = RawChoice::deserialize(deserializer)?;
        Ok(Choice {
            index: raw.index,
            message: raw.message,
            finish_reason: raw.finish_reason.unwrap_or_else(|| FINISH_STOP.to_string()),
        })
    }
}

/// Token accounting for one completion
///
/// `total_tokens` is always the exact sum of the other two counters. It is
/// held as `u64` so two full-range `u32` counters never overflow it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u64,
}

impl Usage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: u64::from(prompt_tokens) + u64::from(completion_tokens),
        }
    }

    pub fn prompt_tokens(&self) -> u32 {
        self.prompt_tokens
    }

    pub fn completion_tokens(&self) -> u32 {
        self.completion_tokens
    }

    pub fn total_tokens(&self) -> u64 {
        self.total_tokens
    }
}

impl<'de> Deserialize<'de> for Usage {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct RawUsage {
            prompt_tokens: u32,
            completion_tokens: u32,
            total_tokens: u64,
        }

        let raw = RawUsage::deserialize(deserializer)?;
        let usage = Usage::new(raw.prompt_tokens, raw.completion_tokens);
        if usage.total_tokens != raw.total_tokens {
            return Err(serde::de::Error::custom(format!(
                "usage.total_tokens ({}) does not equal prompt_tokens + completion_tokens ({})",
                raw.total_tokens, usage.total_tokens
            )));
        }
        Ok(usage)
    }
}

/// Chat completion response in canonical form
///
/// Fields are private; build fresh responses with [`ChatResponse::new`] and
/// replay stored ones through deserialization, which applies the same checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatResponse {
    id: String,
    object: String,
    created: i64,
    model: String,
    choices: Vec<Choice>,
    usage: Usage,
}

impl ChatResponse {
    /// Create a freshly generated response with a new id and the current time
    pub fn new(model: impl Into<String>, choices: Vec<Choice>, usage: Usage) -> Self {
        Self {
            id: format!("chatcmpl-{}", uuid::Uuid::new_v4()),
            object: OBJECT_CHAT_COMPLETION.to_string(),
            created: unix_now(),
            model: model.into(),
            choices,
            usage,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn object(&self) -> &str {
        &self.object
    }

    pub fn created(&self) -> i64 {
        self.created
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn choices(&self) -> &[Choice] {
        &self.choices
    }

    pub fn usage(&self) -> Usage {
        self.usage
    }
}

impl<'de> Deserialize<'de> for ChatResponse {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct RawChatResponse {
            id: String,
            #[serde(default)]
            object: Option<String>,
            #[serde(default)]
            created: Option<i64>,
            model: String,
            choices: Vec<Choice>,
            usage: Usage,
        }

        let raw = RawChatResponse::deserialize(deserializer)?;

        if raw.choices.is_empty() {
            return Err(serde::de::Error::custom("choices cannot be empty"));
        }

        Ok(ChatResponse {
            id: raw.id,
            object: raw
                .object
                .unwrap_or_else(|| OBJECT_CHAT_COMPLETION.to_string()),
            created: raw.created.unwrap_or_else(unix_now),
            model: raw.model,
            choices: raw.choices,
            usage: raw.usage,
        })
    }
}

/// Current time as unix seconds
///
/// A clock set before the epoch reports 0 rather than failing the request.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
