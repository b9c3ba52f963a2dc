//! Rule-based routing strategy
//!
//! Fast, deterministic routing using pattern matching on request content.
//! No I/O and no failure modes - every request gets a decision.
//!
//! Routes based on:
//! - An explicit model name (always wins)
//! - Code keywords in the message text
//! - Token count estimates

use super::{RouteDecision, RouteMetadata, RouteReason, TaskType};
use crate::config::RoutingConfig;
use crate::providers::ProviderRegistry;
use crate::schema::ChatRequest;

/// Rule-based router over a static model → provider table
#[derive(Clone)]
pub struct ModelRouter {
    config: RoutingConfig,
    providers: ProviderRegistry,
}

impl ModelRouter {
    /// Create a new router
    pub fn new(config: RoutingConfig, providers: ProviderRegistry) -> Self {
        Self { config, providers }
    }

    pub fn config(&self) -> &RoutingConfig {
        &self.config
    }

    /// Route a request
    ///
    /// # Routing Logic
    /// 1. An explicit model passes through unchanged
    /// 2. `auto` resolves to the coder model for code tasks, the cheap model
    ///    below the token threshold, and the default model otherwise
    /// 3. The resolved model and the fallback model are each mapped to a
    ///    provider; the fallback is dropped when both providers coincide
    pub fn route(&self, request: &ChatRequest) -> RouteDecision {
        let (model, reason) = self.resolve_model(request);

        let primary_id = self.config.provider_for(&model);
        let fallback_id = self.config.provider_for(self.config.fallback_model());

        let fallbacks = if fallback_id == primary_id {
            Vec::new()
        } else {
            vec![self.providers.get(fallback_id)]
        };

        let decision = RouteDecision {
            primary: self.providers.get(primary_id),
            model,
            fallbacks,
            reason,
        };

        tracing::debug!(
            requested_model = %request.model(),
            resolved_model = %decision.model,
            provider = %primary_id,
            fallback = ?decision.fallback_providers(),
            reason = decision.reason.as_str(),
            "Route decision made"
        );

        decision
    }

    fn resolve_model(&self, request: &ChatRequest) -> (String, RouteReason) {
        if !request.is_auto() {
            return (request.model().to_string(), RouteReason::Explicit);
        }

        let meta = RouteMetadata::from_request(request, self.config.code_keywords());
        let (model, reason) = self.evaluate_rules(&meta);
        (model.to_string(), reason)
    }

    /// Evaluate rules against metadata, in priority order
    fn evaluate_rules(&self, meta: &RouteMetadata) -> (&str, RouteReason) {
        // Rule 1: code tasks go to the coder model regardless of size
        if matches!(meta.task_type, TaskType::Code) {
            return (self.config.coder_model(), RouteReason::Code);
        }

        // Rule 2: short prompts go to the cheap model
        if meta.token_estimate < self.config.cheap_token_threshold() {
            return (self.config.cheap_model(), RouteReason::Cheap);
        }

        (self.config.default_model(), RouteReason::Default)
    }
}
