//! Property-based tests for fingerprinting and routing
//!
//! - The cache key depends only on request content, never on JSON field order
//! - Routing is a pure function of request content and static config
//! - Usage totals always equal the sum of their parts

use async_trait::async_trait;
use modelgate::cache::CacheKey;
use modelgate::config::Config;
use modelgate::providers::{ProviderAdapter, ProviderError, ProviderId, ProviderRegistry};
use modelgate::router::{ModelRouter, RouteReason};
use modelgate::schema::{ChatRequest, ChatResponse, Message, Usage};
use proptest::prelude::*;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

struct Unreachable(ProviderId);

#[async_trait]
impl ProviderAdapter for Unreachable {
    fn id(&self) -> ProviderId {
        self.0
    }

    async fn generate(
        &self,
        _request: &ChatRequest,
        _timeout: Duration,
    ) -> Result<ChatResponse, ProviderError> {
        unreachable!("routing must not call adapters")
    }
}

fn router() -> ModelRouter {
    let config = Config::from_str("[server]\nhost = \"127.0.0.1\"\nport = 8000\n").unwrap();
    ModelRouter::new(
        config.routing,
        ProviderRegistry::new(
            Arc::new(Unreachable(ProviderId::OpenAi)),
            Arc::new(Unreachable(ProviderId::Ollama)),
        ),
    )
}

// ---------------------------------------------------------------------------
// Strategy helpers
// ---------------------------------------------------------------------------

fn arb_messages() -> impl Strategy<Value = Vec<(String, String)>> {
    prop::collection::vec(
        (
            prop::sample::select(vec!["system", "user", "assistant"]).prop_map(String::from),
            ".{0,80}",
        ),
        1..5,
    )
}

fn quote(s: &str) -> String {
    serde_json::to_string(s).unwrap()
}

/// Messages as JSON, with `content` before or after `role`
fn messages_json(messages: &[(String, String)], content_first: bool) -> String {
    let items: Vec<String> = messages
        .iter()
        .map(|(role, content)| {
            if content_first {
                format!(r#"{{"content":{},"role":{}}}"#, quote(content), quote(role))
            } else {
                format!(r#"{{"role":{},"content":{}}}"#, quote(role), quote(content))
            }
        })
        .collect();
    format!("[{}]", items.join(","))
}

// ---------------------------------------------------------------------------
// Property: fingerprint ignores JSON field order
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn cache_key_ignores_field_order(
        messages in arb_messages(),
        model in "[a-z0-9.:-]{1,20}",
        temperature in 0.0..=2.0f64,
        max_tokens in 1..4096u32,
    ) {
        let a = format!(
            r#"{{"model":{},"messages":{},"temperature":{},"max_tokens":{}}}"#,
            quote(&model),
            messages_json(&messages, false),
            temperature,
            max_tokens
        );
        let b = format!(
            r#"{{"max_tokens":{},"temperature":{},"messages":{},"model":{}}}"#,
            max_tokens,
            temperature,
            messages_json(&messages, true),
            quote(&model)
        );

        let a: ChatRequest = serde_json::from_str(&a).unwrap();
        let b: ChatRequest = serde_json::from_str(&b).unwrap();
        prop_assert_eq!(CacheKey::for_request(&a), CacheKey::for_request(&b));
    }
}

// ---------------------------------------------------------------------------
// Property: different content gives a different fingerprint
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn cache_key_separates_distinct_content(a in ".{0,64}", b in ".{0,64}") {
        prop_assume!(a != b);
        let ka = CacheKey::for_request(&ChatRequest::new(vec![Message::user(a)]));
        let kb = CacheKey::for_request(&ChatRequest::new(vec![Message::user(b)]));
        prop_assert_ne!(ka, kb);
    }
}

// ---------------------------------------------------------------------------
// Property: routing is deterministic
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn routing_is_pure(messages in arb_messages()) {
        let router = router();
        let request = ChatRequest::new(
            messages.into_iter().map(|(role, content)| Message::new(role, content)).collect(),
        );

        let first = router.route(&request);
        let second = router.route(&request);
        prop_assert_eq!(&first.model, &second.model);
        prop_assert_eq!(first.reason, second.reason);
        prop_assert_eq!(first.primary_provider(), second.primary_provider());
        prop_assert_eq!(first.fallback_providers(), second.fallback_providers());

        // Fallback never repeats the primary's provider
        prop_assert!(!first.fallback_providers().contains(&first.primary_provider()));
    }
}

// ---------------------------------------------------------------------------
// Property: explicit models pass through unchanged
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn explicit_model_passes_through(model in "[a-z][a-z0-9.:-]{0,24}", content in ".{0,200}") {
        prop_assume!(model != "auto");
        let request = ChatRequest::new(vec![Message::user(content)]).with_model(model.clone());
        let decision = router().route(&request);
        prop_assert_eq!(decision.model, model);
        prop_assert_eq!(decision.reason, RouteReason::Explicit);
    }
}

// ---------------------------------------------------------------------------
// Property: the cheap rule follows the token estimate
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn cheap_rule_tracks_token_estimate(len in 0usize..4000) {
        // 'x' never forms a code keyword
        let request = ChatRequest::new(vec![Message::user("x".repeat(len))]);
        let decision = router().route(&request);
        if len / 4 < 500 {
            prop_assert_eq!(decision.reason, RouteReason::Cheap);
        } else {
            prop_assert_eq!(decision.reason, RouteReason::Default);
        }
    }
}

// ---------------------------------------------------------------------------
// Property: usage totals are consistent
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn usage_total_is_sum(prompt in any::<u32>(), completion in any::<u32>()) {
        let usage = Usage::new(prompt, completion);
        prop_assert_eq!(usage.total_tokens(), u64::from(prompt) + u64::from(completion));

        let json = serde_json::to_string(&usage).unwrap();
        let back: Usage = serde_json::from_str(&json).unwrap();
        prop_assert_eq!(back, usage);
    }
}
