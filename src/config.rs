//! Configuration management for modelgate
//!
//! Parses TOML configuration files and provides typed access to settings.
//! Every section except `[server]` is optional and falls back to defaults
//! that mirror a stock OpenAI + local Ollama deployment.

use crate::error::{AppError, AppResult};
use crate::providers::ProviderId;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Upper bound for any configured timeout, in seconds
const MAX_TIMEOUT_SECONDS: u64 = 300;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// End-to-end deadline covering the primary and every fallback attempt
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    /// Static key clients must send in `X-Gateway-Key`; no check when unset
    #[serde(default)]
    pub gateway_key: Option<String>,
}

fn default_request_timeout() -> u64 {
    60
}

/// Backend connection settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub openai: OpenAiConfig,
    #[serde(default)]
    pub ollama: OllamaConfig,
}

/// OpenAI-compatible backend
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OpenAiConfig {
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
    #[serde(default, skip_serializing)]
    api_key: Option<String>,
}

impl OpenAiConfig {
    /// Bearer credential for the backend
    ///
    /// The config file value wins; otherwise `OPENAI_API_KEY` is read from
    /// the environment.
    pub fn api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .filter(|key| !key.trim().is_empty())
    }
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: default_openai_base_url(),
            api_key: None,
        }
    }
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

/// Ollama-compatible backend
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OllamaConfig {
    #[serde(default = "default_ollama_base_url")]
    pub base_url: String,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: default_ollama_base_url(),
        }
    }
}

fn default_ollama_base_url() -> String {
    "http://localhost:11434".to_string()
}

/// Routing configuration
///
/// All fields are private; the table is read-only once loaded. Use the
/// accessors.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RoutingConfig {
    #[serde(default = "default_default_model")]
    default_model: String,
    #[serde(default = "default_coder_model")]
    coder_model: String,
    #[serde(default = "default_cheap_model")]
    cheap_model: String,
    #[serde(default = "default_fallback_model")]
    fallback_model: String,
    /// Provider for models missing from `model_providers`
    #[serde(default = "default_provider")]
    default_provider: ProviderId,
    /// Auto-routed requests under this many estimated tokens use the cheap model
    #[serde(default = "default_cheap_token_threshold")]
    cheap_token_threshold: usize,
    /// Lowercase substrings that mark a request as a coding task
    #[serde(default = "default_code_keywords")]
    code_keywords: Vec<String>,
    #[serde(default = "default_model_providers")]
    model_providers: BTreeMap<String, ProviderId>,
}

impl RoutingConfig {
    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    pub fn coder_model(&self) -> &str {
        &self.coder_model
    }

    pub fn cheap_model(&self) -> &str {
        &self.cheap_model
    }

    pub fn fallback_model(&self) -> &str {
        &self.fallback_model
    }

    pub fn default_provider(&self) -> ProviderId {
        self.default_provider
    }

    pub fn cheap_token_threshold(&self) -> usize {
        self.cheap_token_threshold
    }

    pub fn code_keywords(&self) -> &[String] {
        &self.code_keywords
    }

    /// Static model → provider table, sorted by model name
    pub fn model_providers(&self) -> &BTreeMap<String, ProviderId> {
        &self.model_providers
    }

    /// Provider serving `model`; unknown models go to the default provider
    pub fn provider_for(&self, model: &str) -> ProviderId {
        self.model_providers
            .get(model)
            .copied()
            .unwrap_or(self.default_provider)
    }
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            default_model: default_default_model(),
            coder_model: default_coder_model(),
            cheap_model: default_cheap_model(),
            fallback_model: default_fallback_model(),
            default_provider: default_provider(),
            cheap_token_threshold: default_cheap_token_threshold(),
            code_keywords: default_code_keywords(),
            model_providers: default_model_providers(),
        }
    }
}

fn default_default_model() -> String {
    "gpt-3.5-turbo".to_string()
}

fn default_coder_model() -> String {
    "codellama".to_string()
}

fn default_cheap_model() -> String {
    "gpt-3.5-turbo".to_string()
}

fn default_fallback_model() -> String {
    "gpt-3.5-turbo".to_string()
}

fn default_provider() -> ProviderId {
    ProviderId::Ollama
}

fn default_cheap_token_threshold() -> usize {
    500
}

fn default_code_keywords() -> Vec<String> {
    ["def ", "class ", "import ", "function", "code"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_model_providers() -> BTreeMap<String, ProviderId> {
    [
        ("gpt-4", ProviderId::OpenAi),
        ("gpt-3.5-turbo", ProviderId::OpenAi),
        ("llama3.2", ProviderId::Ollama),
        ("qwen3:4b", ProviderId::Ollama),
        ("gemma3:4b", ProviderId::Ollama),
        ("codellama", ProviderId::Ollama),
    ]
    .into_iter()
    .map(|(model, provider)| (model.to_string(), provider))
    .collect()
}

/// Per-call timeout for backend requests
///
/// Validated at parse time: the value must be in (0, 300] seconds, so an
/// invalid `TimeoutsConfig` cannot exist.
#[derive(Debug, Clone, Serialize)]
pub struct TimeoutsConfig {
    provider_seconds: u64,
}

impl TimeoutsConfig {
    /// Create a new TimeoutsConfig with a validated provider timeout
    ///
    /// # Errors
    ///
    /// Returns an error if the timeout is zero or exceeds 300 seconds.
    pub fn new(provider_seconds: u64) -> AppResult<Self> {
        if provider_seconds == 0 {
            return Err(AppError::Config(format!(
                "timeouts.provider_seconds must be greater than 0, got {}",
                provider_seconds
            )));
        }
        if provider_seconds > MAX_TIMEOUT_SECONDS {
            return Err(AppError::Config(format!(
                "timeouts.provider_seconds cannot exceed {} seconds, got {}",
                MAX_TIMEOUT_SECONDS, provider_seconds
            )));
        }
        Ok(Self { provider_seconds })
    }

    pub fn provider_seconds(&self) -> u64 {
        self.provider_seconds
    }
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            provider_seconds: 30,
        }
    }
}

impl<'de> Deserialize<'de> for TimeoutsConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(deny_unknown_fields)]
        struct RawTimeouts {
            #[serde(default)]
            provider_seconds: Option<u64>,
        }

        let raw = RawTimeouts::deserialize(deserializer)?;
        match raw.provider_seconds {
            Some(seconds) => TimeoutsConfig::new(seconds).map_err(|e| {
                serde::de::Error::custom(format!("Invalid timeout configuration: {}", e))
            }),
            None => Ok(TimeoutsConfig::default()),
        }
    }
}

/// Where cached responses live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    /// Per-process LRU map, lost on restart
    #[default]
    Memory,
    /// Shared Redis server
    Redis,
}

/// Response cache configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub backend: CacheBackend,
    #[serde(default = "default_cache_ttl")]
    pub ttl_seconds: u64,
    /// Capacity of the memory backend
    #[serde(default = "default_cache_max_entries")]
    pub max_entries: usize,
    #[serde(default)]
    redis_url: Option<String>,
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    /// Connection URL for the redis backend
    ///
    /// The config file value wins, then `REDIS_URL` from the environment,
    /// then `redis://localhost:6379`.
    pub fn redis_url(&self) -> String {
        self.redis_url
            .clone()
            .or_else(|| std::env::var("REDIS_URL").ok())
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(default_redis_url)
    }

    pub fn set_redis_url(&mut self, url: impl Into<String>) {
        self.redis_url = Some(url.into());
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            backend: CacheBackend::default(),
            ttl_seconds: default_cache_ttl(),
            max_entries: default_cache_max_entries(),
            redis_url: None,
        }
    }
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_cache_ttl() -> u64 {
    3600
}

fn default_cache_max_entries() -> usize {
    10_000
}

/// Where audit records are written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AuditSinkKind {
    /// Structured log events only
    #[default]
    Tracing,
    /// Rows in a local SQLite database
    Sqlite,
}

/// Audit log configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuditConfig {
    #[serde(default)]
    pub sink: AuditSinkKind,
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: String,
    /// Also audit requests served from the cache
    #[serde(default)]
    pub record_cache_hits: bool,
    /// Records buffered ahead of the sink; further records are dropped
    #[serde(default = "default_audit_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            sink: AuditSinkKind::default(),
            sqlite_path: default_sqlite_path(),
            record_cache_hits: false,
            queue_capacity: default_audit_queue_capacity(),
        }
    }
}

fn default_audit_queue_capacity() -> usize {
    1024
}

fn default_sqlite_path() -> String {
    "requests.db".to_string()
}

/// Observability configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let path_display = path.as_ref().display().to_string();

        let content = std::fs::read_to_string(path.as_ref()).map_err(|source| {
            AppError::ConfigFileRead {
                path: path_display.clone(),
                source,
            }
        })?;

        let config: Self =
            toml::from_str(&content).map_err(|source| AppError::ConfigParseFailed {
                path: path_display.clone(),
                source,
            })?;

        config
            .validate()
            .map_err(|e| AppError::ConfigValidationFailed {
                path: path_display,
                reason: e.to_string(),
            })?;

        Ok(config)
    }

    /// Timeout applied to a single backend call
    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.provider_seconds())
    }

    /// Deadline for the whole request, primary and fallback attempts included
    pub fn request_deadline(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_seconds)
    }

    /// Validate configuration after parsing
    ///
    /// This is called automatically by `from_file()` and `from_str()`.
    pub fn validate(&self) -> AppResult<()> {
        for (field, value) in [
            ("routing.default_model", self.routing.default_model()),
            ("routing.coder_model", self.routing.coder_model()),
            ("routing.cheap_model", self.routing.cheap_model()),
            ("routing.fallback_model", self.routing.fallback_model()),
        ] {
            if value.trim().is_empty() {
                return Err(AppError::Config(format!("{} cannot be empty", field)));
            }
        }

        if self.routing.cheap_token_threshold() == 0 {
            return Err(AppError::Config(
                "routing.cheap_token_threshold must be greater than 0".to_string(),
            ));
        }

        if self
            .routing
            .code_keywords()
            .iter()
            .any(|k| k.is_empty() || k.to_lowercase() != *k)
        {
            return Err(AppError::Config(
                "routing.code_keywords entries must be non-empty lowercase strings".to_string(),
            ));
        }

        for (name, url) in [
            ("providers.openai.base_url", &self.providers.openai.base_url),
            ("providers.ollama.base_url", &self.providers.ollama.base_url),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(AppError::Config(format!(
                    "{} '{}' must start with 'http://' or 'https://'",
                    name, url
                )));
            }
        }

        if self.server.request_timeout_seconds == 0 {
            return Err(AppError::Config(
                "request_timeout_seconds must be greater than 0".to_string(),
            ));
        }
        if self.server.request_timeout_seconds > MAX_TIMEOUT_SECONDS {
            return Err(AppError::Config(format!(
                "request_timeout_seconds cannot exceed {} seconds, got {}",
                MAX_TIMEOUT_SECONDS, self.server.request_timeout_seconds
            )));
        }

        if self.cache.enabled {
            if self.cache.ttl_seconds == 0 {
                return Err(AppError::Config(
                    "cache.ttl_seconds must be greater than 0".to_string(),
                ));
            }
            if self.cache.max_entries == 0 {
                return Err(AppError::Config(
                    "cache.max_entries must be greater than 0".to_string(),
                ));
            }
            if self.cache.backend == CacheBackend::Redis {
                let url = self.cache.redis_url();
                if !url.starts_with("redis://")
                    && !url.starts_with("rediss://")
                    && !url.starts_with("unix://")
                {
                    return Err(AppError::Config(format!(
                        "cache.redis_url '{}' must start with 'redis://', 'rediss://' or 'unix://'",
                        url
                    )));
                }
            }
        }

        if self.audit.queue_capacity == 0 {
            return Err(AppError::Config(
                "audit.queue_capacity must be greater than 0".to_string(),
            ));
        }

        if self.audit.sink == AuditSinkKind::Sqlite && self.audit.sqlite_path.trim().is_empty() {
            return Err(AppError::Config(
                "audit.sqlite_path cannot be empty when audit.sink = \"sqlite\"".to_string(),
            ));
        }

        Ok(())
    }
}

impl FromStr for Config {
    type Err = AppError;

    fn from_str(toml_str: &str) -> Result<Self, Self::Err> {
        let config: Config =
            toml::from_str(toml_str).map_err(|source| AppError::ConfigParseFailed {
                path: "<string>".to_string(),
                source,
            })?;

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL_CONFIG: &str = r#"
[server]
host = "127.0.0.1"
port = 8000
"#;

    const FULL_CONFIG: &str = r#"
[server]
host = "0.0.0.0"
port = 8000
request_timeout_seconds = 45
gateway_key = "sk-gateway-secret"

[providers.openai]
base_url = "http://localhost:9000/v1"
api_key = "sk-test"

[providers.ollama]
base_url = "http://localhost:11434"

[routing]
default_model = "gpt-4"
coder_model = "qwen3:4b"
cheap_model = "llama3.2"
fallback_model = "gpt-4"
default_provider = "openai"
cheap_token_threshold = 200
code_keywords = ["def ", "fn "]

[routing.model_providers]
"gpt-4" = "openai"
"llama3.2" = "ollama"
"qwen3:4b" = "ollama"

[timeouts]
provider_seconds = 10

[cache]
enabled = true
backend = "redis"
redis_url = "redis://cache.internal:6380/2"
ttl_seconds = 120

[audit]
sink = "sqlite"
sqlite_path = "/tmp/audit.db"
record_cache_hits = true
queue_capacity = 64

[observability]
log_level = "debug"
"#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = Config::from_str(MINIMAL_CONFIG).expect("should parse config");
        assert_eq!(config.server.request_timeout_seconds, 60);
        assert_eq!(config.server.gateway_key, None);
        assert_eq!(config.providers.ollama.base_url, "http://localhost:11434");
        assert_eq!(config.routing.coder_model(), "codellama");
        assert_eq!(config.routing.cheap_model(), "gpt-3.5-turbo");
        assert_eq!(config.routing.default_provider(), ProviderId::Ollama);
        assert_eq!(config.routing.cheap_token_threshold(), 500);
        assert_eq!(config.routing.model_providers().len(), 6);
        assert_eq!(config.timeouts.provider_seconds(), 30);
        assert!(!config.cache.enabled);
        assert_eq!(config.cache.ttl_seconds, 3600);
        assert_eq!(config.cache.backend, CacheBackend::Memory);
        assert_eq!(config.audit.sink, AuditSinkKind::Tracing);
        assert!(!config.audit.record_cache_hits);
        assert_eq!(config.audit.queue_capacity, 1024);
    }

    #[test]
    fn test_full_config_parses() {
        let config = Config::from_str(FULL_CONFIG).expect("should parse config");
        assert_eq!(config.server.gateway_key.as_deref(), Some("sk-gateway-secret"));
        assert_eq!(config.providers.openai.api_key().as_deref(), Some("sk-test"));
        assert_eq!(config.routing.cheap_model(), "llama3.2");
        assert_eq!(config.routing.default_provider(), ProviderId::OpenAi);
        assert_eq!(config.routing.code_keywords(), ["def ", "fn "]);
        assert_eq!(config.routing.model_providers().len(), 3);
        assert_eq!(config.provider_timeout(), Duration::from_secs(10));
        assert_eq!(config.request_deadline(), Duration::from_secs(45));
        assert!(config.cache.enabled);
        assert_eq!(config.cache.ttl(), Duration::from_secs(120));
        assert_eq!(config.cache.backend, CacheBackend::Redis);
        assert_eq!(config.cache.redis_url(), "redis://cache.internal:6380/2");
        assert_eq!(config.audit.sink, AuditSinkKind::Sqlite);
        assert_eq!(config.audit.queue_capacity, 64);
        assert_eq!(config.observability.log_level, "debug");
    }

    #[test]
    fn test_provider_for_unknown_model_uses_default_provider() {
        let config = Config::from_str(MINIMAL_CONFIG).unwrap();
        assert_eq!(config.routing.provider_for("gpt-4"), ProviderId::OpenAi);
        assert_eq!(config.routing.provider_for("codellama"), ProviderId::Ollama);
        assert_eq!(
            config.routing.provider_for("mistral-nemo"),
            ProviderId::Ollama
        );
    }

    #[test]
    fn test_redis_backend_rejects_non_redis_url() {
        let toml = format!(
            "{}\n[cache]\nenabled = true\nbackend = \"redis\"\nredis_url = \"http://localhost:6379\"\n",
            MINIMAL_CONFIG
        );
        let err = Config::from_str(&toml).unwrap_err();
        assert!(err.to_string().contains("cache.redis_url"), "{}", err);
    }

    #[test]
    fn test_zero_audit_queue_capacity_rejected() {
        let toml = format!("{}\n[audit]\nqueue_capacity = 0\n", MINIMAL_CONFIG);
        let err = Config::from_str(&toml).unwrap_err();
        assert!(err.to_string().contains("audit.queue_capacity"), "{}", err);
    }

    #[test]
    fn test_zero_provider_timeout_rejected_at_parse_time() {
        let toml = format!("{}\n[timeouts]\nprovider_seconds = 0\n", MINIMAL_CONFIG);
        let err = Config::from_str(&toml).unwrap_err();
        assert!(err.to_string().contains("provider_seconds"), "{}", err);
    }

    #[test]
    fn test_excessive_provider_timeout_rejected() {
        let toml = format!("{}\n[timeouts]\nprovider_seconds = 301\n", MINIMAL_CONFIG);
        assert!(Config::from_str(&toml).is_err());
    }

    #[test]
    fn test_unknown_provider_name_rejected() {
        let toml = format!(
            "{}\n[routing.model_providers]\n\"claude\" = \"anthropic\"\n",
            MINIMAL_CONFIG
        );
        assert!(Config::from_str(&toml).is_err());
    }

    #[test]
    fn test_uppercase_keyword_rejected() {
        let toml = format!("{}\n[routing]\ncode_keywords = [\"DEF \"]\n", MINIMAL_CONFIG);
        let err = Config::from_str(&toml).unwrap_err();
        assert!(err.to_string().contains("code_keywords"));
    }

    #[test]
    fn test_enabled_cache_requires_positive_ttl() {
        let toml = format!("{}\n[cache]\nenabled = true\nttl_seconds = 0\n", MINIMAL_CONFIG);
        let err = Config::from_str(&toml).unwrap_err();
        assert!(err.to_string().contains("ttl_seconds"));
    }

    #[test]
    fn test_base_url_scheme_validated() {
        let toml = format!(
            "{}\n[providers.ollama]\nbase_url = \"localhost:11434\"\n",
            MINIMAL_CONFIG
        );
        let err = Config::from_str(&toml).unwrap_err();
        assert!(err.to_string().contains("providers.ollama.base_url"));
    }

    #[test]
    fn test_from_file_reports_missing_file() {
        let err = Config::from_file("/definitely/not/here/modelgate.toml").unwrap_err();
        assert!(matches!(err, AppError::ConfigFileRead { .. }));
    }
}
