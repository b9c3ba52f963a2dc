//! Request orchestration
//!
//! Ties routing, caching, provider calls with fallback, and audit together
//! for one chat completion:
//!
//! 1. Force `stream = false`, route, and pin the resolved model on the request
//! 2. Serve from cache when possible (no adapter is called)
//! 3. Call the primary provider, then each fallback in order, stopping at the
//!    first success or when the end-to-end deadline is spent
//! 4. Cache the successful response and queue an audit record off the
//!    response path

use crate::audit::{AuditRecord, AuditWriter};
use crate::cache::ResponseCache;
use crate::config::{Config, TimeoutsConfig};
use crate::error::{AppError, AppResult};
use crate::metrics::{CacheResult, Metrics, Outcome, log_recording_failure};
use crate::providers::{ProviderAdapter, ProviderError, ProviderId};
use crate::router::ModelRouter;
use crate::schema::{ChatRequest, ChatResponse};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default end-to-end budget for one request, all attempts included
pub const DEFAULT_REQUEST_DEADLINE: Duration = Duration::from_secs(60);

/// A served chat completion and how it was obtained
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub response: ChatResponse,
    /// Provider that produced the response; for cache hits, the routed primary
    pub provider: ProviderId,
    pub fallback_used: bool,
    pub cache_hit: bool,
}

/// Drives one request through router, cache, providers and audit
pub struct Orchestrator {
    router: ModelRouter,
    cache: ResponseCache,
    audit: AuditWriter,
    metrics: Arc<Metrics>,
    provider_timeout: Duration,
    deadline: Duration,
    record_cache_hits: bool,
}

impl Orchestrator {
    /// Create an orchestrator with default timeouts and no cache-hit audit
    pub fn new(
        router: ModelRouter,
        cache: ResponseCache,
        audit: AuditWriter,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            router,
            cache,
            audit,
            metrics,
            provider_timeout: Duration::from_secs(TimeoutsConfig::default().provider_seconds()),
            deadline: DEFAULT_REQUEST_DEADLINE,
            record_cache_hits: false,
        }
    }

    /// Apply timeouts and audit switches from `config`
    pub fn configured(self, config: &Config) -> Self {
        self.with_timeouts(config.provider_timeout(), config.request_deadline())
            .with_cache_hit_audit(config.audit.record_cache_hits)
    }

    /// Per-call timeout and end-to-end deadline
    pub fn with_timeouts(mut self, provider_timeout: Duration, deadline: Duration) -> Self {
        self.provider_timeout = provider_timeout;
        self.deadline = deadline;
        self
    }

    /// Also audit responses served from cache
    pub fn with_cache_hit_audit(mut self, enabled: bool) -> Self {
        self.record_cache_hits = enabled;
        self
    }

    pub fn router(&self) -> &ModelRouter {
        &self.router
    }

    pub fn audit(&self) -> &AuditWriter {
        &self.audit
    }

    /// Serve one chat completion
    ///
    /// # Errors
    ///
    /// Returns [`AppError::AllProvidersFailed`] carrying the last provider
    /// error when neither the primary nor any fallback produced a response
    /// within the deadline.
    pub async fn handle(&self, mut request: ChatRequest) -> AppResult<Completion> {
        let started = Instant::now();
        let deadline = started + self.deadline;

        if request.disable_streaming() {
            tracing::debug!("Streaming requested but not supported, answering in one piece");
        }

        let decision = self.router.route(&request);
        request.resolve_model(decision.model.clone());
        let primary = decision.primary_provider();

        if let Some(response) = self.cache.get(&request).await {
            self.record_cache_lookup(CacheResult::Hit);
            log_recording_failure(
                "record_request",
                self.metrics.record_request(Some(primary), Outcome::CacheHit),
            );
            tracing::info!(model = %request.model(), provider = %primary, "Served from cache");

            if self.record_cache_hits {
                self.audit.submit(AuditRecord::success(
                    request.model(),
                    response.model(),
                    Some(primary),
                    response.usage(),
                    elapsed_ms(started),
                    false,
                    true,
                ));
            }

            return Ok(Completion {
                response,
                provider: primary,
                fallback_used: false,
                cache_hit: true,
            });
        }
        if self.cache.is_enabled() {
            self.record_cache_lookup(CacheResult::Miss);
        }

        let candidates = std::iter::once(&decision.primary).chain(decision.fallbacks.iter());
        let mut attempts = 0usize;
        let mut last_error: Option<ProviderError> = None;

        for (position, adapter) in candidates.enumerate() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                tracing::warn!(
                    attempts,
                    deadline_ms = self.deadline.as_millis() as u64,
                    "Request deadline exhausted, not trying further providers"
                );
                break;
            }

            let fallback = position > 0;
            if fallback {
                log_recording_failure(
                    "record_fallback",
                    self.metrics.record_fallback(adapter.id()),
                );
                tracing::info!(
                    provider = %adapter.id(),
                    model = %request.model(),
                    "Trying fallback provider"
                );
            }

            attempts += 1;
            let timeout = self.provider_timeout.min(remaining);
            match self.call(adapter.as_ref(), &request, timeout).await {
                Ok(response) => {
                    return Ok(self
                        .complete(&request, response, adapter.id(), fallback, started)
                        .await);
                }
                Err(e) => {
                    tracing::warn!(
                        provider = %e.provider(),
                        kind = e.kind().as_str(),
                        model = %request.model(),
                        attempt = attempts,
                        error = %e,
                        "Provider call failed"
                    );
                    log_recording_failure(
                        "record_provider_failure",
                        self.metrics.record_provider_failure(e.provider(), e.kind()),
                    );
                    last_error = Some(e);
                }
            }
        }

        let last_error = last_error.map(|e| e.to_string()).unwrap_or_else(|| {
            "request deadline exhausted before any provider was called".to_string()
        });

        tracing::error!(
            model = %request.model(),
            attempts,
            last_error = %last_error,
            "All providers failed"
        );
        log_recording_failure(
            "record_request",
            self.metrics.record_request(None, Outcome::Failed),
        );
        self.audit.submit(AuditRecord::failure(
            request.model(),
            elapsed_ms(started),
            502,
            attempts > 1,
            last_error.clone(),
        ));

        Err(AppError::AllProvidersFailed {
            attempts,
            last_error,
        })
    }

    async fn call(
        &self,
        adapter: &dyn ProviderAdapter,
        request: &ChatRequest,
        timeout: Duration,
    ) -> Result<ChatResponse, ProviderError> {
        let provider = adapter.id();
        let started = Instant::now();

        let result = match tokio::time::timeout(timeout, adapter.generate(request, timeout)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::timeout(provider, timeout)),
        };

        log_recording_failure(
            "record_provider_latency",
            self.metrics
                .record_provider_latency(provider, elapsed_ms(started)),
        );
        result
    }

    async fn complete(
        &self,
        request: &ChatRequest,
        response: ChatResponse,
        provider: ProviderId,
        fallback_used: bool,
        started: Instant,
    ) -> Completion {
        self.cache.set(request, &response).await;

        let outcome = if fallback_used {
            Outcome::Fallback
        } else {
            Outcome::Success
        };
        log_recording_failure(
            "record_request",
            self.metrics.record_request(Some(provider), outcome),
        );

        tracing::info!(
            model = %request.model(),
            provider = %provider,
            fallback_used,
            total_tokens = response.usage().total_tokens(),
            "Request served"
        );

        self.audit.submit(AuditRecord::success(
            request.model(),
            response.model(),
            Some(provider),
            response.usage(),
            elapsed_ms(started),
            fallback_used,
            false,
        ));

        Completion {
            response,
            provider,
            fallback_used,
            cache_hit: false,
        }
    }

    fn record_cache_lookup(&self, result: CacheResult) {
        log_recording_failure(
            "record_cache_lookup",
            self.metrics.record_cache_lookup(result),
        );
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditError, AuditSink, MemoryAuditSink};
    use crate::cache::{DEFAULT_TTL, MemoryStore};
    use crate::providers::ProviderRegistry;
    use crate::schema::{Choice, Message, Usage};
    use async_trait::async_trait;
    use std::str::FromStr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Adapter returning a canned result and counting calls
    struct Scripted {
        id: ProviderId,
        reply: Result<ChatResponse, ProviderError>,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn ok(id: ProviderId, text: &str) -> Arc<Self> {
            Arc::new(Self {
                id,
                reply: Ok(ChatResponse::new(
                    format!("{}-model", id),
                    vec![Choice {
                        index: 0,
                        message: Message::new("assistant", text),
                        finish_reason: "stop".to_string(),
                    }],
                    Usage::new(3, 4),
                )),
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            })
        }

        fn failing(id: ProviderId, reason: &str) -> Arc<Self> {
            Arc::new(Self {
                id,
                reply: Err(ProviderError::Transport {
                    provider: id,
                    reason: reason.to_string(),
                }),
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            })
        }

        fn slow(id: ProviderId, delay: Duration) -> Arc<Self> {
            let mut adapter = Self::ok(id, "late");
            if let Some(a) = Arc::get_mut(&mut adapter) {
                a.delay = delay;
            }
            adapter
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ProviderAdapter for Scripted {
        fn id(&self) -> ProviderId {
            self.id
        }

        async fn generate(
            &self,
            _request: &ChatRequest,
            _timeout: Duration,
        ) -> Result<ChatResponse, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.reply.clone()
        }
    }

    struct FailingSink;

    #[async_trait]
    impl AuditSink for FailingSink {
        async fn append(&self, _record: AuditRecord) -> Result<(), AuditError> {
            Err(AuditError::Storage("disk full".to_string()))
        }
    }

    struct Harness {
        orchestrator: Orchestrator,
        audit: Arc<MemoryAuditSink>,
        metrics: Arc<Metrics>,
    }

    fn harness(
        openai: Arc<Scripted>,
        ollama: Arc<Scripted>,
        cache: ResponseCache,
    ) -> Harness {
        let config = Config::from_str("[server]\nhost = \"127.0.0.1\"\nport = 8000\n")
            .expect("should parse config");
        let router = ModelRouter::new(config.routing, ProviderRegistry::new(openai, ollama));
        let audit = Arc::new(MemoryAuditSink::new());
        let metrics = Arc::new(Metrics::new().unwrap());
        let writer = AuditWriter::spawn(audit.clone(), 64, metrics.clone());
        let orchestrator = Orchestrator::new(router, cache, writer, metrics.clone());
        Harness {
            orchestrator,
            audit,
            metrics,
        }
    }

    fn memory_cache() -> ResponseCache {
        ResponseCache::new(Arc::new(MemoryStore::new(100)), DEFAULT_TTL)
    }

    /// "def " routes to codellama on Ollama with OpenAI as fallback
    fn code_request() -> ChatRequest {
        ChatRequest::new(vec![Message::user("def fib(n): return n")])
    }

    async fn wait_for_records(sink: &MemoryAuditSink, count: usize) -> Vec<AuditRecord> {
        for _ in 0..200 {
            let records = sink.records().await;
            if records.len() >= count {
                return records;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        sink.records().await
    }

    #[tokio::test]
    async fn test_primary_success_skips_fallback() {
        let openai = Scripted::ok(ProviderId::OpenAi, "from openai");
        let ollama = Scripted::ok(ProviderId::Ollama, "from ollama");
        let h = harness(openai.clone(), ollama.clone(), ResponseCache::disabled());

        let completion = h.orchestrator.handle(code_request()).await.unwrap();

        assert_eq!(completion.provider, ProviderId::Ollama);
        assert!(!completion.fallback_used);
        assert!(!completion.cache_hit);
        assert_eq!(ollama.calls(), 1);
        assert_eq!(openai.calls(), 0);

        let records = wait_for_records(&h.audit, 1).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].model_requested, "codellama");
        assert_eq!(records[0].model_used.as_deref(), Some("ollama-model"));
        assert_eq!(records[0].status_code, 200);
        assert_eq!(records[0].total_tokens, 7);
        assert_eq!(records[0].error_message, None);
    }

    #[tokio::test]
    async fn test_primary_transport_error_falls_back() {
        let openai = Scripted::ok(ProviderId::OpenAi, "rescued");
        let ollama = Scripted::failing(ProviderId::Ollama, "connection refused");
        let h = harness(openai.clone(), ollama.clone(), ResponseCache::disabled());

        let completion = h.orchestrator.handle(code_request()).await.unwrap();

        assert!(completion.fallback_used);
        assert_eq!(completion.provider, ProviderId::OpenAi);
        assert_eq!(completion.response.choices()[0].message.content(), "rescued");
        assert_eq!(ollama.calls(), 1);
        assert_eq!(openai.calls(), 1);

        let records = wait_for_records(&h.audit, 1).await;
        assert!(records[0].fallback_used);
        assert_eq!(records[0].provider, Some(ProviderId::OpenAi));
        assert_eq!(records[0].error_message, None);

        let output = h.metrics.gather().unwrap();
        assert!(output.contains(r#"modelgate_fallbacks_total{provider="openai"} 1"#));
        assert!(output.contains(
            r#"modelgate_provider_failures_total{kind="transport",provider="ollama"} 1"#
        ));
    }

    #[tokio::test]
    async fn test_all_providers_failing_reports_last_error() {
        let openai = Scripted::failing(ProviderId::OpenAi, "openai is down");
        let ollama = Scripted::failing(ProviderId::Ollama, "ollama is down");
        let cache = memory_cache();
        let h = harness(openai.clone(), ollama.clone(), cache.clone());

        let err = h.orchestrator.handle(code_request()).await.unwrap_err();

        match &err {
            AppError::AllProvidersFailed {
                attempts,
                last_error,
            } => {
                assert_eq!(*attempts, 2);
                assert!(last_error.contains("openai is down"), "got: {}", last_error);
            }
            other => panic!("expected AllProvidersFailed, got {:?}", other),
        }

        // Nothing was cached for the resolved request
        let resolved = code_request().with_model("codellama");
        assert!(cache.get(&resolved).await.is_none());

        let records = wait_for_records(&h.audit, 1).await;
        assert_eq!(records[0].status_code, 502);
        assert_eq!(records[0].provider, None);
        assert_eq!(records[0].provider_label(), "none");
        assert_eq!(records[0].model_used, None);
        assert!(
            records[0]
                .error_message
                .as_deref()
                .unwrap_or_default()
                .contains("openai is down")
        );
    }

    #[tokio::test]
    async fn test_single_provider_failure_has_no_fallback() {
        // "Hello!" routes to gpt-3.5-turbo on OpenAI; fallback model is also OpenAI
        let openai = Scripted::failing(ProviderId::OpenAi, "boom");
        let ollama = Scripted::ok(ProviderId::Ollama, "unused");
        let h = harness(openai.clone(), ollama.clone(), ResponseCache::disabled());

        let err = h
            .orchestrator
            .handle(ChatRequest::new(vec![Message::user("Hello!")]))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::AllProvidersFailed { attempts: 1, .. }));
        assert_eq!(openai.calls(), 1);
        assert_eq!(ollama.calls(), 0);

        let records = wait_for_records(&h.audit, 1).await;
        assert!(!records[0].fallback_used);
    }

    #[tokio::test]
    async fn test_repeated_request_is_served_from_cache() {
        let openai = Scripted::ok(ProviderId::OpenAi, "cached answer");
        let ollama = Scripted::ok(ProviderId::Ollama, "unused");
        let h = harness(openai.clone(), ollama.clone(), memory_cache());
        let request = ChatRequest::new(vec![Message::user("Hello!")]);

        let first = h.orchestrator.handle(request.clone()).await.unwrap();
        let second = h.orchestrator.handle(request).await.unwrap();

        assert!(!first.cache_hit);
        assert!(second.cache_hit);
        assert_eq!(openai.calls(), 1);
        assert_eq!(
            serde_json::to_vec(&first.response).unwrap(),
            serde_json::to_vec(&second.response).unwrap()
        );

        // Cache hits are not audited unless asked for
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.audit.records().await.len(), 1);

        let output = h.metrics.gather().unwrap();
        assert!(output.contains(r#"modelgate_cache_lookups_total{result="hit"} 1"#));
        assert!(output.contains(r#"modelgate_cache_lookups_total{result="miss"} 1"#));
    }

    #[tokio::test]
    async fn test_cache_hit_audit_can_be_enabled() {
        let openai = Scripted::ok(ProviderId::OpenAi, "answer");
        let ollama = Scripted::ok(ProviderId::Ollama, "unused");
        let mut h = harness(openai, ollama, memory_cache());
        h.orchestrator = h.orchestrator.with_cache_hit_audit(true);
        let request = ChatRequest::new(vec![Message::user("Hello!")]);

        h.orchestrator.handle(request.clone()).await.unwrap();
        h.orchestrator.handle(request).await.unwrap();

        let records = wait_for_records(&h.audit, 2).await;
        assert_eq!(records.len(), 2);
        assert!(records.iter().any(|r| r.cache_hit));
    }

    #[tokio::test]
    async fn test_stream_flag_is_forced_off() {
        let openai = Scripted::ok(ProviderId::OpenAi, "answer");
        let ollama = Scripted::ok(ProviderId::Ollama, "unused");
        let cache = memory_cache();
        let h = harness(openai, ollama, cache.clone());
        let streaming: ChatRequest = serde_json::from_str(
            r#"{"messages": [{"role": "user", "content": "Hello!"}], "stream": true}"#,
        )
        .unwrap();

        h.orchestrator.handle(streaming).await.unwrap();

        // Stored under the non-streaming fingerprint
        let expected = ChatRequest::new(vec![Message::user("Hello!")]).with_model("gpt-3.5-turbo");
        assert!(cache.get(&expected).await.is_some());
    }

    #[tokio::test]
    async fn test_provider_call_is_bounded_by_timeout() {
        let openai = Scripted::ok(ProviderId::OpenAi, "rescued");
        let ollama = Scripted::slow(ProviderId::Ollama, Duration::from_secs(5));
        let mut h = harness(openai.clone(), ollama.clone(), ResponseCache::disabled());
        h.orchestrator = h
            .orchestrator
            .with_timeouts(Duration::from_millis(50), Duration::from_secs(10));

        let completion = h.orchestrator.handle(code_request()).await.unwrap();

        assert!(completion.fallback_used);
        assert_eq!(completion.provider, ProviderId::OpenAi);
        let output = h.metrics.gather().unwrap();
        assert!(output.contains(
            r#"modelgate_provider_failures_total{kind="timeout",provider="ollama"} 1"#
        ));
    }

    #[tokio::test]
    async fn test_spent_deadline_stops_fallback_loop() {
        let openai = Scripted::ok(ProviderId::OpenAi, "too late");
        let ollama = Scripted::slow(ProviderId::Ollama, Duration::from_secs(5));
        let mut h = harness(openai.clone(), ollama.clone(), ResponseCache::disabled());
        h.orchestrator = h
            .orchestrator
            .with_timeouts(Duration::from_secs(30), Duration::from_millis(50));

        let err = h.orchestrator.handle(code_request()).await.unwrap_err();

        match err {
            AppError::AllProvidersFailed {
                attempts,
                last_error,
            } => {
                assert_eq!(attempts, 1);
                assert!(last_error.contains("timed out"), "got: {}", last_error);
            }
            other => panic!("expected AllProvidersFailed, got {:?}", other),
        }
        assert_eq!(openai.calls(), 0);
    }

    #[tokio::test]
    async fn test_audit_failure_does_not_fail_request() {
        let config = Config::from_str("[server]\nhost = \"127.0.0.1\"\nport = 8000\n").unwrap();
        let router = ModelRouter::new(
            config.routing,
            ProviderRegistry::new(
                Scripted::ok(ProviderId::OpenAi, "fine"),
                Scripted::ok(ProviderId::Ollama, "fine"),
            ),
        );
        let metrics = Arc::new(Metrics::new().unwrap());
        let orchestrator = Orchestrator::new(
            router,
            ResponseCache::disabled(),
            AuditWriter::spawn(Arc::new(FailingSink), 64, metrics.clone()),
            metrics.clone(),
        );

        let completion = orchestrator
            .handle(ChatRequest::new(vec![Message::user("Hello!")]))
            .await
            .unwrap();
        assert_eq!(completion.provider, ProviderId::OpenAi);

        orchestrator.audit().close().await;
        assert_eq!(metrics.audit_failures_count(), 1);
    }
}
