//! Server-Sent Events (SSE) handler.
//!
//! Subscribes to the [`lc_core::events::EventBus`], optionally filters by
//! stream key, replays recent events for late joiners, and sends keepalive
//! heartbeats.

use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use lc_core::events::StreamEvent;
use serde::Deserialize;
use std::convert::Infallible;
use std::time::Duration;

use crate::context::AppContext;

const REPLAY_EVENTS: usize = 50;

/// Optional query parameter for per-stream filtering.
#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub stream_key: Option<String>,
}

/// GET /api/v1/live/events -- SSE stream of stream events.
pub async fn events_handler(
    State(ctx): State<AppContext>,
    Query(params): Query<EventsQuery>,
) -> Sse<impl futures_core::Stream<Item = Result<Event, Infallible>>> {
    let filter = params.stream_key;

    let recent = ctx.event_bus.recent_events(REPLAY_EVENTS);
    let mut rx = ctx.event_bus.subscribe();

    let stream = async_stream::stream! {
        for event in recent.into_iter().rev() {
            if let Some(sse) = to_sse(&event, filter.as_deref()) {
                yield Ok(sse);
            }
        }

        let mut heartbeat = tokio::time::interval(Duration::from_secs(15));

        loop {
            tokio::select! {
                result = rx.recv() => {
                    match result {
                        Ok(event) => {
                            if let Some(sse) = to_sse(&event, filter.as_deref()) {
                                yield Ok(sse);
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            tracing::debug!("SSE client lagged by {n} events");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
                _ = heartbeat.tick() => {
                    yield Ok(Event::default()
                        .event("heartbeat")
                        .data(r#"{"type":"heartbeat"}"#));
                }
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

fn matches_key(event: &StreamEvent, filter: Option<&str>) -> bool {
    filter.map_or(true, |key| event.payload.stream_key().as_str() == key)
}

fn to_sse(event: &StreamEvent, filter: Option<&str>) -> Option<Event> {
    if !matches_key(event, filter) {
        return None;
    }
    serde_json::to_string(event)
        .ok()
        .map(|data| Event::default().id(event.id.to_string()).data(data))
}
