//! Prometheus metrics collection for modelgate
//!
//! This module provides metrics instrumentation for tracking:
//! - Request outcomes by serving provider
//! - Cache hit/miss ratio
//! - Fallback activations and provider failures by error kind
//! - Provider call latency
//! - Audit sink failures
//!
//! Metrics are exposed via the `/metrics` endpoint in Prometheus text format.

use crate::providers::{ProviderErrorKind, ProviderId};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

/// Label value used when no provider served the request
const NO_PROVIDER: &str = "none";

/// Request outcome enum for type-safe metrics labels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Served by the primary provider
    Success,
    /// Served by a fallback provider
    Fallback,
    /// Replayed from the response cache
    CacheHit,
    /// Every provider failed
    Failed,
}

impl Outcome {
    /// Convert outcome to Prometheus label string
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Fallback => "fallback",
            Outcome::CacheHit => "cache_hit",
            Outcome::Failed => "failed",
        }
    }
}

/// Cache lookup result enum for type-safe metrics labels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheResult {
    Hit,
    Miss,
}

impl CacheResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheResult::Hit => "hit",
            CacheResult::Miss => "miss",
        }
    }
}

/// Metrics collector for modelgate
///
/// Every metric lives in a private registry so several instances (one per
/// test, say) never collide.
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    requests_total: IntCounterVec,
    cache_lookups: IntCounterVec,
    fallbacks: IntCounterVec,
    provider_failures: IntCounterVec,
    provider_latency: HistogramVec,
    audit_failures: IntCounter,
}

impl Metrics {
    /// Create a new Metrics instance
    ///
    /// # Errors
    ///
    /// Returns an error if metric registration fails (e.g., duplicate names).
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        // Cardinality: 3 provider labels (openai, ollama, none) × 4 outcomes
        let requests_total = IntCounterVec::new(
            Opts::new(
                "modelgate_requests_total",
                "Total number of chat completion requests by provider and outcome",
            ),
            &["provider", "outcome"],
        )?;

        let cache_lookups = IntCounterVec::new(
            Opts::new(
                "modelgate_cache_lookups_total",
                "Total number of response cache lookups by result",
            ),
            &["result"],
        )?;

        // Labelled by the provider that was tried as fallback
        let fallbacks = IntCounterVec::new(
            Opts::new(
                "modelgate_fallbacks_total",
                "Total number of fallback attempts by fallback provider",
            ),
            &["provider"],
        )?;

        let provider_failures = IntCounterVec::new(
            Opts::new(
                "modelgate_provider_failures_total",
                "Total number of failed provider calls by provider and error kind",
            ),
            &["provider", "kind"],
        )?;

        let provider_latency = HistogramVec::new(
            HistogramOpts::new(
                "modelgate_provider_latency_ms",
                "Provider call latency in milliseconds, successful or not",
            )
            .buckets(vec![
                10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0, 30000.0,
            ]),
            &["provider"],
        )?;

        let audit_failures = IntCounter::with_opts(Opts::new(
            "modelgate_audit_failures_total",
            "Total number of audit records dropped or not stored by the sink",
        ))?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(cache_lookups.clone()))?;
        registry.register(Box::new(fallbacks.clone()))?;
        registry.register(Box::new(provider_failures.clone()))?;
        registry.register(Box::new(provider_latency.clone()))?;
        registry.register(Box::new(audit_failures.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            requests_total,
            cache_lookups,
            fallbacks,
            provider_failures,
            provider_latency,
            audit_failures,
        })
    }

    /// Record a finished request
    ///
    /// `provider` is `None` when every provider failed.
    pub fn record_request(
        &self,
        provider: Option<ProviderId>,
        outcome: Outcome,
    ) -> Result<(), prometheus::Error> {
        let provider_label = provider.map(|p| p.as_str()).unwrap_or(NO_PROVIDER);
        self.requests_total
            .get_metric_with_label_values(&[provider_label, outcome.as_str()])?
            .inc();
        Ok(())
    }

    pub fn record_cache_lookup(&self, result: CacheResult) -> Result<(), prometheus::Error> {
        self.cache_lookups
            .get_metric_with_label_values(&[result.as_str()])?
            .inc();
        Ok(())
    }

    /// Record that `provider` is about to be tried as a fallback
    pub fn record_fallback(&self, provider: ProviderId) -> Result<(), prometheus::Error> {
        self.fallbacks
            .get_metric_with_label_values(&[provider.as_str()])?
            .inc();
        Ok(())
    }

    pub fn record_provider_failure(
        &self,
        provider: ProviderId,
        kind: ProviderErrorKind,
    ) -> Result<(), prometheus::Error> {
        self.provider_failures
            .get_metric_with_label_values(&[provider.as_str(), kind.as_str()])?
            .inc();
        Ok(())
    }

    /// Record provider call latency
    ///
    /// # Errors
    ///
    /// Rejects NaN, infinite and negative durations; they would corrupt every
    /// percentile of the histogram.
    pub fn record_provider_latency(
        &self,
        provider: ProviderId,
        duration_ms: f64,
    ) -> Result<(), prometheus::Error> {
        if !duration_ms.is_finite() {
            return Err(prometheus::Error::Msg(format!(
                "Histogram value must be finite (not NaN or Infinity), got: {}",
                duration_ms
            )));
        }
        if duration_ms < 0.0 {
            return Err(prometheus::Error::Msg(format!(
                "Histogram value must be non-negative, got: {}",
                duration_ms
            )));
        }

        self.provider_latency
            .get_metric_with_label_values(&[provider.as_str()])?
            .observe(duration_ms);
        Ok(())
    }

    pub fn record_audit_failure(&self) {
        self.audit_failures.inc();
    }

    /// Number of audit failures recorded so far
    pub fn audit_failures_count(&self) -> u64 {
        self.audit_failures.get()
    }

    /// Encode all metrics in Prometheus text format
    pub fn gather(&self) -> Result<String, prometheus::Error> {
        let metric_families = self.registry.gather();
        let metric_count = metric_families.len();

        tracing::debug!(
            metric_family_count = metric_count,
            "Encoding metrics to Prometheus text format"
        );

        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();

        encoder.encode(&metric_families, &mut buffer).map_err(|e| {
            tracing::error!(
                error = %e,
                metric_family_count = metric_count,
                "Prometheus text encoder failed"
            );
            prometheus::Error::Msg(format!(
                "Failed to encode {} metric families: {}",
                metric_count, e
            ))
        })?;

        String::from_utf8(buffer).map_err(|e| {
            prometheus::Error::Msg(format!("Prometheus output is not valid UTF-8: {}", e))
        })
    }
}

/// Log a failed metrics recording and carry on
///
/// Metrics never fail a request.
pub(crate) fn log_recording_failure(operation: &'static str, result: Result<(), prometheus::Error>) {
    if let Err(e) = result {
        tracing::warn!(operation, error = %e, "Failed to record metric");
    }
}
