//! voxlink server binary.
//!
//! Starts the session orchestrator and an axum HTTP server with structured
//! logging, and shuts both down gracefully on SIGTERM/SIGINT.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use voxlink_server::{app, config, process_adapters, spawn_session};
use voxlink_voice::RecentDiagnostics;

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("VOXLINK_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

#[tokio::main]
async fn main() {
    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("config.toml"));

    // Load configuration
    let config = config::load_config(selected_config_path)
        .expect("failed to load configuration: the server cannot start without valid config");

    // Initialize tracing
    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );

    let credentials = config::load_credentials()
        .expect("voice service credentials missing: set VOXLINK_API_KEY and VOXLINK_SECRET_KEY");

    // Start the session
    let diagnostics = Arc::new(RecentDiagnostics::default());
    let adapters = process_adapters(&config, diagnostics.clone());
    let state = spawn_session(&config, credentials, adapters, diagnostics);
    let session = state.session.clone();

    // Build application
    let app = app(state);
    let addr = SocketAddr::new(config.server.host, config.server.port);

    tracing::info!(%addr, service = %config.service.url, "starting voxlink server");

    let listener = TcpListener::bind(addr)
        .await
        .expect("failed to bind to address: is another process using this port?");

    // Serve with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    if let Err(e) = session.shutdown().await {
        tracing::warn!(error = %e, "session did not shut down cleanly");
    }
    tracing::info!("voxlink server shut down");
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, initiating graceful shutdown"); }
        () = terminate => { tracing::info!("received SIGTERM, initiating graceful shutdown"); }
    }
}
