//! voxlink server library logic.
//!
//! Wires the session orchestrator to its concrete adapters and exposes it
//! over a small local HTTP surface: the toggle page, a JSON API and an SSE
//! stream of the toggle view.

pub mod api;
pub mod api_sse;
pub mod config;

use axum::{
    routing::{get, post},
    Extension, Json, Router,
};
use config::Config;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use voxlink_types::ToggleView;
use voxlink_voice::{
    AudioSink, ClientFactory, Components, Credentials, FormatSupport, MicrophoneProvider,
    Orchestrator, OrchestratorHandle, ProcessAudioSink, ProcessFormatSupport, ProcessMicrophone,
    RecentDiagnostics, VoiceClient, WatchReflector, WsVoiceClient,
};

/// Application state shared across all request handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Command handle of the running session orchestrator.
    pub session: OrchestratorHandle,
    /// Latest toggle view, as reflected by the orchestrator.
    pub view: watch::Receiver<ToggleView>,
    /// Recent diagnostics, also logged through `tracing`.
    pub diagnostics: Arc<RecentDiagnostics>,
}

/// The host-side collaborators handed to the orchestrator.
pub struct Adapters {
    pub client_factory: ClientFactory,
    pub microphone: Arc<dyn MicrophoneProvider>,
    pub format_support: Arc<dyn FormatSupport>,
    pub sink: Box<dyn AudioSink>,
}

/// Adapters backed by the WebSocket client and the configured recorder and
/// player processes.
pub fn process_adapters(config: &Config, diagnostics: Arc<RecentDiagnostics>) -> Adapters {
    let service = config.service.clone();
    Adapters {
        client_factory: Box::new(move |credentials: &Credentials| {
            let client = WsVoiceClient::new(service.clone(), credentials.clone())?;
            Ok(Arc::new(client) as Arc<dyn VoiceClient>)
        }),
        microphone: Arc::new(ProcessMicrophone::new(config.capture.clone())),
        format_support: Arc::new(ProcessFormatSupport::new(&config.capture)),
        sink: Box::new(ProcessAudioSink::new(config.playback.clone(), diagnostics)),
    }
}

/// Spawns the session orchestrator. Must be called inside a tokio runtime.
pub fn spawn_session(
    config: &Config,
    credentials: Credentials,
    adapters: Adapters,
    diagnostics: Arc<RecentDiagnostics>,
) -> AppState {
    let (reflector, view) = WatchReflector::new();
    let session = Orchestrator::spawn(Components {
        credentials,
        client_factory: adapters.client_factory,
        reconnect: config.service.reconnect.clone(),
        resume_enabled: config.service.resume_enabled,
        microphone: adapters.microphone,
        format_support: adapters.format_support,
        chunk_interval: config.capture.chunk_interval(),
        sink: adapters.sink,
        reflector: Arc::new(reflector),
        diagnostics: diagnostics.clone(),
    });
    AppState {
        session,
        view,
        diagnostics,
    }
}

/// Health check handler.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(api::index_handler))
        .route("/health", get(health))
        .route("/api/session", get(api::get_session_handler))
        .route("/api/session/toggle", post(api::toggle_handler))
        .route("/api/session/connect", post(api::connect_handler))
        .route("/api/session/disconnect", post(api::disconnect_handler))
        .route("/api/diagnostics", get(api::get_diagnostics_handler))
        .route("/events/session", get(api_sse::get_session_stream_handler))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(Extension(Arc::new(state)))
}
