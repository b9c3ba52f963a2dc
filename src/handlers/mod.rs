//! HTTP request handlers for the modelgate API

use crate::audit::{AuditWriter, sink_from_config};
use crate::cache::ResponseCache;
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::metrics::Metrics;
use crate::middleware::{request_id_middleware, require_gateway_key};
use crate::orchestrator::Orchestrator;
use crate::providers::ProviderRegistry;
use crate::router::ModelRouter;
use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub mod chat;
pub mod health;
pub mod metrics;
pub mod models;

/// Application state shared across all handlers
///
/// All fields are Arc'd for cheap cloning across Axum handlers.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    orchestrator: Arc<Orchestrator>,
    metrics: Arc<Metrics>,
}

impl AppState {
    /// Wire HTTP adapters, router, cache, audit sink and metrics from `config`
    ///
    /// # Errors
    ///
    /// Fails when an HTTP client cannot be built, the audit sink cannot be
    /// opened, the cache backend URL is invalid, or metric registration
    /// fails. Must be called from within a tokio runtime, which runs the
    /// audit writer.
    pub fn new(config: Config) -> AppResult<Self> {
        let providers = ProviderRegistry::from_config(&config)?;
        Self::with_providers(config, providers)
    }

    /// Like [`AppState::new`] but with caller-supplied provider adapters
    pub fn with_providers(config: Config, providers: ProviderRegistry) -> AppResult<Self> {
        let metrics = Arc::new(
            Metrics::new()
                .map_err(|e| AppError::Internal(format!("Failed to register metrics: {}", e)))?,
        );
        let sink = sink_from_config(&config.audit)
            .map_err(|e| AppError::Config(format!("Failed to open audit sink: {}", e)))?;
        let audit = AuditWriter::spawn(sink, config.audit.queue_capacity, metrics.clone());
        let router = ModelRouter::new(config.routing.clone(), providers);
        let cache = ResponseCache::from_config(&config.cache)
            .map_err(|e| AppError::Config(format!("Failed to set up response cache: {}", e)))?;

        let orchestrator = Orchestrator::new(router, cache, audit, metrics.clone()).configured(&config);

        Ok(Self::with_components(
            Arc::new(config),
            Arc::new(orchestrator),
            metrics,
        ))
    }

    /// Assemble state from prebuilt parts
    pub fn with_components(
        config: Arc<Config>,
        orchestrator: Arc<Orchestrator>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            config,
            orchestrator,
            metrics,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }
}

/// Build the HTTP surface
///
/// Only the completion endpoint is behind the gateway key; health, model
/// listing and metrics stay open.
pub fn app(state: AppState) -> Router {
    let protected = Router::new()
        .route("/v1/chat/completions", post(chat::handler))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            require_gateway_key,
        ));

    Router::new()
        .route("/health", get(health::handler))
        .route("/models", get(models::handler))
        .route("/metrics", get(metrics::handler))
        .merge(protected)
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
