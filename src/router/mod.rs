//! Routing logic for modelgate
//!
//! Decides which concrete model and provider serve a request, and which
//! provider to fall back to when the first one fails.

pub mod rule_based;

pub use rule_based::ModelRouter;

use crate::providers::{ProviderAdapter, ProviderId};
use crate::schema::ChatRequest;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Task type classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Code,
    #[default]
    General,
}

/// Why the router picked the model it did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteReason {
    /// Caller named a concrete model; no classification ran
    Explicit,
    /// Auto-routed coding task
    Code,
    /// Auto-routed short prompt
    Cheap,
    /// Auto-routed everything else
    Default,
}

impl RouteReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Explicit => "explicit",
            Self::Code => "code",
            Self::Cheap => "cheap",
            Self::Default => "default",
        }
    }
}

/// Metadata extracted from a request to inform routing decisions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMetadata {
    /// Estimated token count for the request
    pub token_estimate: usize,
    /// Task type classification
    pub task_type: TaskType,
}

impl RouteMetadata {
    /// Classify a request
    ///
    /// Message contents are joined with single spaces in their original order.
    /// The keyword scan runs over the lowercased text; the token estimate uses
    /// the character count of the unmodified text.
    pub fn from_request(request: &ChatRequest, code_keywords: &[String]) -> Self {
        let joined = request
            .messages()
            .iter()
            .map(|m| m.content())
            .collect::<Vec<_>>()
            .join(" ");
        let scan = joined.to_lowercase();

        let task_type = if code_keywords.iter().any(|k| scan.contains(k.as_str())) {
            TaskType::Code
        } else {
            TaskType::General
        };

        Self {
            token_estimate: Self::estimate_tokens(&joined),
            task_type,
        }
    }

    /// Estimate token count from a prompt string (simple heuristic: chars / 4)
    pub fn estimate_tokens(prompt: &str) -> usize {
        prompt.chars().count() / 4
    }
}

/// Result of a routing decision
///
/// `fallbacks` holds at most one adapter and never repeats the primary's
/// provider.
#[derive(Clone)]
pub struct RouteDecision {
    pub primary: Arc<dyn ProviderAdapter>,
    pub model: String,
    pub fallbacks: Vec<Arc<dyn ProviderAdapter>>,
    pub reason: RouteReason,
}

impl RouteDecision {
    pub fn primary_provider(&self) -> ProviderId {
        self.primary.id()
    }

    pub fn fallback_providers(&self) -> Vec<ProviderId> {
        self.fallbacks.iter().map(|a| a.id()).collect()
    }
}

impl fmt::Debug for RouteDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteDecision")
            .field("primary", &self.primary_provider())
            .field("model", &self.model)
            .field("fallbacks", &self.fallback_providers())
            .field("reason", &self.reason)
            .finish()
    }
}
