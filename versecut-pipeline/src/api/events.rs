//! Server-sent event stream
//!
//! Forwards pipeline and import events to connected clients. Each message
//! carries the event type in the SSE `event:` field and the serialized
//! event as `data:`. A quiet 30 seconds produces a keepalive; a subscriber
//! that falls behind the bus buffer loses the oldest events rather than
//! back-pressuring the runners.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event as SseEvent, Sse};
use futures::stream::Stream;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::AppState;

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// GET /api/v1/pipeline/events
pub async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    info!("New SSE client connected to pipeline events");

    let mut rx = state.event_bus.subscribe();

    let stream = async_stream::stream! {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(KEEPALIVE_INTERVAL) => {
                    debug!("SSE: sending keepalive");
                    yield Ok(SseEvent::default()
                        .event("keepalive")
                        .data(r#"{"status":"connected"}"#));
                }

                received = rx.recv() => {
                    match received {
                        Ok(event) => {
                            match serde_json::to_string(&event) {
                                Ok(json) => {
                                    yield Ok(SseEvent::default()
                                        .event(event.event_type())
                                        .data(json));
                                }
                                Err(e) => {
                                    warn!("SSE: failed to serialize {}: {}", event.event_type(), e);
                                }
                            }
                        }
                        // Slow consumer: the bus dropped events for us; the
                        // holes are silent, delivery resumes in order
                        Err(RecvError::Lagged(skipped)) => {
                            debug!(skipped, "SSE subscriber lagged");
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            }
        }
    };

    Sse::new(stream)
}
