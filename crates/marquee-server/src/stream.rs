//! Per-connection stream writer: drains a connection's queue onto the HTTP
//! response body as `text/event-stream` frames.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use futures::Stream;

use marquee_bus::{EventReceiver, Manager};
use marquee_core::{ConnectionId, PushEvent};

/// Removes the connection from the registry exactly once, on whichever path
/// the stream ends: client disconnect (body dropped by the HTTP stack),
/// natural end after deactivation, or task cancellation.
struct RemoveGuard {
    manager: Arc<Manager>,
    id: ConnectionId,
}

impl Drop for RemoveGuard {
    fn drop(&mut self) {
        tracing::info!(connection_id = %self.id, "stream closed");
        self.manager.remove(&self.id);
    }
}

struct WriterState {
    receiver: EventReceiver,
    idle_timeout: Duration,
    handshake: Option<String>,
    _guard: RemoveGuard,
}

/// The serving loop as a frame stream. Emits the `connected` handshake
/// first, then queued events, with a synthetic ping whenever `idle_timeout`
/// passes without traffic.
pub fn frame_stream(
    manager: Arc<Manager>,
    receiver: EventReceiver,
    idle_timeout: Duration,
) -> impl Stream<Item = Result<String, Infallible>> {
    let conn = receiver.connection();
    let handshake = PushEvent::connected(&conn.id, conn.role).to_frame();
    let guard = RemoveGuard {
        manager,
        id: conn.id.clone(),
    };
    let state = WriterState {
        receiver,
        idle_timeout,
        handshake: Some(handshake),
        _guard: guard,
    };

    futures::stream::unfold(state, |mut state| async move {
        if let Some(frame) = state.handshake.take() {
            return Some((Ok(frame), state));
        }
        let event = state.receiver.next(state.idle_timeout).await?;
        Some((Ok(event.to_frame()), state))
    })
}

/// Wrap the frame stream in an SSE response. Headers disable intermediary
/// caching and buffering so frames reach the client as they are written.
pub fn sse_response(
    manager: Arc<Manager>,
    receiver: EventReceiver,
    idle_timeout: Duration,
) -> Response {
    let stream = frame_stream(manager, receiver, idle_timeout);
    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
            (header::HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        Body::from_stream(stream),
    )
        .into_response()
}
