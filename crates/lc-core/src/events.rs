//! Stream event system for SSE broadcasting.
//!
//! [`EventBus`] wraps a `tokio::sync::broadcast` channel with a bounded
//! ring-buffer of recent events so that late-joining clients can catch up.
//! Every lifecycle transition and ingest connect/disconnect is published
//! here.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::ids::StreamKey;
use crate::session::StreamState;

/// Maximum number of events retained in the ring buffer.
const MAX_RECENT_EVENTS: usize = 100;

// ---------------------------------------------------------------------------
// StreamEventPayload
// ---------------------------------------------------------------------------

/// What happened to a stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEventPayload {
    // -- Scheduling ----------------------------------------------------------
    StreamScheduled {
        stream_key: StreamKey,
        title: String,
    },

    // -- Ingest --------------------------------------------------------------
    PublishStarted {
        stream_key: StreamKey,
        remote_addr: Option<String>,
    },
    PublishStopped {
        stream_key: StreamKey,
        bytes_received: u64,
    },

    // -- Lifecycle -----------------------------------------------------------
    StateChanged {
        stream_key: StreamKey,
        from: StreamState,
        to: StreamState,
        diagnostic: Option<String>,
    },
    SegmentsAvailable {
        stream_key: StreamKey,
        count: usize,
    },
    RecordingPersisted {
        stream_key: StreamKey,
        url: String,
    },
}

impl StreamEventPayload {
    /// The stream this event is about.
    pub fn stream_key(&self) -> &StreamKey {
        match self {
            StreamEventPayload::StreamScheduled { stream_key, .. }
            | StreamEventPayload::PublishStarted { stream_key, .. }
            | StreamEventPayload::PublishStopped { stream_key, .. }
            | StreamEventPayload::StateChanged { stream_key, .. }
            | StreamEventPayload::SegmentsAvailable { stream_key, .. }
            | StreamEventPayload::RecordingPersisted { stream_key, .. } => stream_key,
        }
    }
}

// ---------------------------------------------------------------------------
// StreamEvent
// ---------------------------------------------------------------------------

/// A timestamped event ready for broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub payload: StreamEventPayload,
}

impl StreamEvent {
    pub fn new(payload: StreamEventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            payload,
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Broadcast channel with a bounded ring buffer of recent events.
pub struct EventBus {
    tx: broadcast::Sender<StreamEvent>,
    recent: RwLock<VecDeque<StreamEvent>>,
}

impl EventBus {
    /// `capacity` sizes the broadcast channel; the ring buffer is always
    /// [`MAX_RECENT_EVENTS`].
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            recent: RwLock::new(VecDeque::with_capacity(MAX_RECENT_EVENTS)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.tx.subscribe()
    }

    /// Broadcast to all current subscribers and store in the ring buffer.
    pub fn broadcast(&self, payload: StreamEventPayload) {
        let event = StreamEvent::new(payload);

        {
            let mut recent = self.recent.write();
            if recent.len() >= MAX_RECENT_EVENTS {
                recent.pop_back();
            }
            recent.push_front(event.clone());
        }

        // No subscribers is fine.
        let _ = self.tx.send(event);
    }

    /// Return the `n` most recent events (newest first).
    pub fn recent_events(&self, n: usize) -> Vec<StreamEvent> {
        let recent = self.recent.read();
        recent.iter().take(n).cloned().collect()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> StreamKey {
        "abc123".parse().unwrap()
    }

    #[test]
    fn broadcast_and_receive() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.broadcast(StreamEventPayload::StateChanged {
            stream_key: key(),
            from: StreamState::Connecting,
            to: StreamState::Live,
            diagnostic: None,
        });

        let event = rx.try_recv().unwrap();
        match &event.payload {
            StreamEventPayload::StateChanged { to, .. } => assert_eq!(*to, StreamState::Live),
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn recent_events_capped() {
        let bus = EventBus::new(256);
        for count in 0..150 {
            bus.broadcast(StreamEventPayload::SegmentsAvailable { stream_key: key(), count });
        }
        assert_eq!(bus.recent_events(200).len(), MAX_RECENT_EVENTS);
    }

    #[test]
    fn recent_events_newest_first() {
        let bus = EventBus::default();
        for count in 1..=3 {
            bus.broadcast(StreamEventPayload::SegmentsAvailable { stream_key: key(), count });
        }
        let recent = bus.recent_events(2);
        assert_eq!(
            recent[0].payload,
            StreamEventPayload::SegmentsAvailable { stream_key: key(), count: 3 }
        );
        assert_eq!(recent.len(), 2);
    }

    #[test]
    fn payload_is_tagged() {
        let json = serde_json::to_value(StreamEventPayload::PublishStopped {
            stream_key: key(),
            bytes_received: 42,
        })
        .unwrap();
        assert_eq!(json["type"], "publish_stopped");
        assert_eq!(json["stream_key"], "abc123");
    }

    #[test]
    fn payload_exposes_stream_key() {
        let payload = StreamEventPayload::PublishStarted {
            stream_key: key(),
            remote_addr: None,
        };
        assert_eq!(payload.stream_key().as_str(), "abc123");
    }

    #[test]
    fn no_subscribers_does_not_panic() {
        let bus = EventBus::new(4);
        bus.broadcast(StreamEventPayload::RecordingPersisted {
            stream_key: key(),
            url: "/uploads/x.mp4".into(),
        });
    }
}
