//! modelgate HTTP server
//!
//! Starts an Axum web server exposing the chat completion gateway.

use clap::Parser;
use modelgate::{
    cli::{Cli, Command, generate_config_template},
    config::Config,
    handlers::{self, AppState},
    telemetry,
};
use std::net::SocketAddr;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if let Some(Command::Config { output }) = cli.command {
        let template = generate_config_template();
        match output {
            Some(path) => {
                std::fs::write(&path, template)?;
                eprintln!("Wrote configuration template to {}", path);
            }
            None => print!("{}", template),
        }
        return Ok(());
    }

    let config = Config::from_file(&cli.config)?;

    telemetry::init(&config.observability.log_level);

    tracing::info!(
        config = %cli.config,
        cache_enabled = config.cache.enabled,
        cache_backend = ?config.cache.backend,
        audit_sink = ?config.audit.sink,
        auth_enabled = config.server.gateway_key.is_some(),
        "Starting modelgate server on {}:{}",
        config.server.host,
        config.server.port
    );

    let addr = SocketAddr::from((
        config
            .server
            .host
            .parse::<std::net::IpAddr>()
            .unwrap_or_else(|_| std::net::IpAddr::from([0, 0, 0, 0])),
        config.server.port,
    ));

    let state = AppState::new(config)?;
    let app = handlers::app(state.clone());

    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Write out audit records still queued from the last requests
    state.orchestrator().audit().close().await;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
