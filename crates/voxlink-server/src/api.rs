//! API handlers for the voxlink server.

use crate::AppState;
use axum::{
    extract::{Extension, Json},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use std::sync::Arc;
use thiserror::Error;
use voxlink_types::SessionSnapshot;
use voxlink_voice::{Diagnostic, VoiceError};

const INDEX_HTML: &str = include_str!("../static/index.html");

/// API error type mapping to HTTP status codes.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("session unavailable: {0}")]
    Unavailable(String),
}

impl From<VoiceError> for ApiError {
    fn from(e: VoiceError) -> Self {
        ApiError::Unavailable(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
        };

        let body = Json(serde_json::json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

/// Handler for `GET /`: the toggle page.
pub async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// Handler for `GET /api/session`.
pub async fn get_session_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    Ok(Json(state.session.snapshot().await?))
}

/// Handler for `POST /api/session/toggle`.
///
/// The command is applied before the snapshot is taken, but the connection
/// itself completes asynchronously, hence `202 Accepted`.
pub async fn toggle_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<(StatusCode, Json<SessionSnapshot>), ApiError> {
    state.session.toggle().await?;
    accepted(&state).await
}

/// Handler for `POST /api/session/connect`.
pub async fn connect_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<(StatusCode, Json<SessionSnapshot>), ApiError> {
    state.session.connect().await?;
    accepted(&state).await
}

/// Handler for `POST /api/session/disconnect`.
pub async fn disconnect_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<(StatusCode, Json<SessionSnapshot>), ApiError> {
    state.session.disconnect().await?;
    accepted(&state).await
}

async fn accepted(state: &AppState) -> Result<(StatusCode, Json<SessionSnapshot>), ApiError> {
    let snapshot = state.session.snapshot().await?;
    Ok((StatusCode::ACCEPTED, Json(snapshot)))
}

/// Handler for `GET /api/diagnostics`. Oldest first.
pub async fn get_diagnostics_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Json<Vec<Diagnostic>> {
    Json(state.diagnostics.recent())
}
