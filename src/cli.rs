//! Command-line interface for modelgate
//!
//! Provides argument parsing and subcommand handling for the modelgate binary.

use clap::{Parser, Subcommand};

/// Unified gateway in front of OpenAI and Ollama chat backends
#[derive(Parser)]
#[command(name = "modelgate")]
#[command(version)]
#[command(about = "Unified gateway in front of OpenAI and Ollama chat backends")]
#[command(
    long_about = "modelgate exposes one OpenAI-compatible chat completion endpoint, \
    picks a model and backend per request, falls back to a second backend on failure, \
    caches identical requests and keeps an audit log of every call."
)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "modelgate.toml", global = true)]
    pub config: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Generate a template configuration file
    Config {
        /// Output file path (prints to stdout if not specified)
        #[arg(short, long)]
        output: Option<String>,
    },
}

/// Generate template configuration content
pub fn generate_config_template() -> &'static str {
    r#"# modelgate configuration
# ========================

# ─────────────────────────────────────────────────────────────────────────────
# SERVER
# ─────────────────────────────────────────────────────────────────────────────

[server]
# IP address to bind to (0.0.0.0 for all interfaces, 127.0.0.1 for localhost only)
host = "0.0.0.0"
port = 8000

# End-to-end budget in seconds for one request, fallback attempts included
request_timeout_seconds = 60

# Clients must send this value in the X-Gateway-Key header.
# Remove the line to run without authentication.
gateway_key = "change-me"

# ─────────────────────────────────────────────────────────────────────────────
# PROVIDERS
# ─────────────────────────────────────────────────────────────────────────────

[providers.openai]
base_url = "https://api.openai.com/v1"
# Falls back to the OPENAI_API_KEY environment variable when unset
# api_key = "sk-..."

[providers.ollama]
base_url = "http://localhost:11434"

# ─────────────────────────────────────────────────────────────────────────────
# ROUTING
# ─────────────────────────────────────────────────────────────────────────────
#
# Requests with model = "auto" (or no model) are classified:
#   - any code keyword in the messages  → coder_model
#   - fewer than cheap_token_threshold  → cheap_model
#   - everything else                   → default_model
# Any other model name is passed through unchanged.

[routing]
default_model = "gpt-3.5-turbo"
coder_model = "codellama"
cheap_model = "gpt-3.5-turbo"

# Tried once on a different provider when the primary fails
fallback_model = "gpt-3.5-turbo"

# Provider for models missing from the table below: "openai" or "ollama"
default_provider = "ollama"

# Estimated tokens (characters / 4)
cheap_token_threshold = 500

# Lowercase substrings, matched case-insensitively
code_keywords = ["def ", "class ", "import ", "function", "code"]

[routing.model_providers]
"gpt-4" = "openai"
"gpt-3.5-turbo" = "openai"
"llama3.2" = "ollama"
"qwen3:4b" = "ollama"
"gemma3:4b" = "ollama"
"codellama" = "ollama"

# ─────────────────────────────────────────────────────────────────────────────
# TIMEOUTS
# ─────────────────────────────────────────────────────────────────────────────

[timeouts]
# Per backend call, in seconds (1-300)
provider_seconds = 30

# ─────────────────────────────────────────────────────────────────────────────
# CACHE
# ─────────────────────────────────────────────────────────────────────────────

[cache]
enabled = true
# "memory" keeps entries in this process; "redis" shares them across replicas
backend = "memory"
ttl_seconds = 3600
# Capacity of the memory backend, least recently used entries go first
max_entries = 10000
# Used by the redis backend; falls back to REDIS_URL, then redis://localhost:6379
# redis_url = "redis://localhost:6379"

# ─────────────────────────────────────────────────────────────────────────────
# AUDIT LOG
# ─────────────────────────────────────────────────────────────────────────────

[audit]
# "tracing" logs each request; "sqlite" also stores it in sqlite_path
sink = "sqlite"
sqlite_path = "requests.db"

# Cache hits are not audited unless enabled
record_cache_hits = false

# Records waiting for the sink; beyond this they are dropped and counted
queue_capacity = 1024

# ─────────────────────────────────────────────────────────────────────────────
# OBSERVABILITY
# ─────────────────────────────────────────────────────────────────────────────

[observability]
# Log level: "trace", "debug", "info", "warn", "error" (RUST_LOG overrides)
log_level = "info"

# Prometheus metrics are always available at /metrics on the server port
"#
}
