//! Streaming endpoint
//!
//! Delivers the user's real-time events via Server-Sent Events. Each SSE
//! event name is the catalogue event name and its data is the JSON payload.

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::Stream;
use std::convert::Infallible;
use tokio_stream::StreamExt as _;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use crate::AppState;
use crate::auth::CurrentUser;
use crate::metrics::CONNECTED_STREAMS;

/// Keeps the open-stream gauge in step with the stream's lifetime
struct StreamGuard {
    user_id: String,
}

impl StreamGuard {
    fn new(user_id: String) -> Self {
        CONNECTED_STREAMS.inc();
        tracing::debug!(%user_id, "Event stream opened");
        Self { user_id }
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        CONNECTED_STREAMS.dec();
        tracing::debug!(user_id = %self.user_id, "Event stream closed");
    }
}

/// GET /api/v1/streaming
/// Stream events for the authenticated user
pub async fn stream_events(
    State(state): State<AppState>,
    CurrentUser(session): CurrentUser,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.hub.subscribe(&session.user_id).await;
    let guard = StreamGuard::new(session.user_id);

    let stream = BroadcastStream::new(receiver).filter_map(move |item| {
        let guard = &guard;
        match item {
            Ok(event) => Some(Ok(Event::default()
                .event(event.name())
                .data(event.payload().to_string()))),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                tracing::warn!(user_id = %guard.user_id, skipped, "Event stream lagged; events dropped");
                None
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
