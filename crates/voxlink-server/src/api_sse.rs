//! SSE stream of the toggle view.

use crate::AppState;
use axum::{
    extract::Extension,
    response::{sse::Event, Sse},
};
use futures_util::Stream;
use std::{convert::Infallible, sync::Arc};
use tokio_stream::wrappers::WatchStream;
use tokio_stream::StreamExt;

/// Handler for `GET /events/session`.
///
/// Sends the current toggle view immediately, then every change. Slow
/// subscribers only ever see the latest view.
pub async fn get_session_stream_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = WatchStream::new(state.view.clone());

    let mapped_stream = stream.filter_map(|view| match serde_json::to_string(&view) {
        Ok(data) => Some(Ok(Event::default().data(data))),
        Err(e) => {
            tracing::error!("failed to serialize toggle view: {}", e);
            None
        }
    });

    Sse::new(mapped_stream).keep_alive(axum::response::sse::KeepAlive::default())
}
