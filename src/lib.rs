//! modelgate - unified gateway for chat completion backends
//!
//! Accepts OpenAI-shaped chat completion requests, picks a concrete model and
//! backend (OpenAI or Ollama) per request, falls back to the other backend on
//! failure, caches identical requests and audits every backend-served call.

pub mod audit;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod orchestrator;
pub mod providers;
pub mod router;
pub mod schema;
pub mod telemetry;
