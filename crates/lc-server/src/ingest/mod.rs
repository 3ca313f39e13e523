//! Ingest listener.
//!
//! Encoders publish over RTMP to `rtmp://host:{ingest.port}/{app_name}/{key}`
//! (see [`rtmp`]). The same relay also accepts container bytes (FLV or
//! MPEG-TS) pushed as a chunked HTTP body to `PUT|POST /live/{key}` on the
//! companion control port, which additionally serves `/health` and the list
//! of connected publishers.
//!
//! Either way the connection is the publish session: connecting starts (or
//! attaches to) the stream, and the byte stream ending, for whatever reason,
//! stops it.

pub mod flv;
pub mod rtmp;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::{ConnectInfo, DefaultBodyLimit, Path, Request, State};
use axum::routing::{get, put};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use lc_core::{Error, StreamKey, StreamSession};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::context::AppContext;
use crate::error::AppError;
use crate::routes;

/// A connected publisher, as reported on the control port.
#[derive(Debug, Clone, Serialize)]
pub struct PublisherInfo {
    pub stream_key: StreamKey,
    pub remote_addr: Option<String>,
    pub connected_at: DateTime<Utc>,
    pub bytes_received: u64,
}

struct PublisherEntry {
    remote_addr: Option<String>,
    connected_at: DateTime<Utc>,
    bytes: Arc<AtomicU64>,
}

/// Publishers currently connected to the ingest port.
#[derive(Default)]
pub struct PublisherTable {
    entries: DashMap<StreamKey, PublisherEntry>,
}

impl PublisherTable {
    /// Record a publisher; the returned counter tracks relayed bytes.
    pub fn register(&self, key: &StreamKey, remote_addr: Option<String>) -> Arc<AtomicU64> {
        let bytes = Arc::new(AtomicU64::new(0));
        self.entries.insert(
            key.clone(),
            PublisherEntry {
                remote_addr,
                connected_at: Utc::now(),
                bytes: bytes.clone(),
            },
        );
        bytes
    }

    pub fn remove(&self, key: &StreamKey) {
        self.entries.remove(key);
    }

    /// Connected publishers, oldest first.
    pub fn list(&self) -> Vec<PublisherInfo> {
        let mut list: Vec<PublisherInfo> = self
            .entries
            .iter()
            .map(|e| PublisherInfo {
                stream_key: e.key().clone(),
                remote_addr: e.remote_addr.clone(),
                connected_at: e.connected_at,
                bytes_received: e.bytes.load(Ordering::Relaxed),
            })
            .collect();
        list.sort_by_key(|p| p.connected_at);
        list
    }
}

/// Router for the ingest companion control port.
///
/// Serve it with `into_make_service_with_connect_info::<SocketAddr>()` to
/// record HTTP publisher addresses.
pub fn build_ingest_control_router(ctx: AppContext) -> Router {
    Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/api/publishers", get(list_publishers))
        .route(
            "/live/{key}",
            put(publish).post(publish).layer(DefaultBodyLimit::disable()),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

/// GET /api/publishers (control port)
async fn list_publishers(State(ctx): State<AppContext>) -> Json<Vec<PublisherInfo>> {
    Json(ctx.publishers.list())
}

/// Relay one publisher's bytes into its stream until the bytes end or the
/// worker stops reading, then report the disconnect.
///
/// Publish errors (unknown key, second publisher) are returned before any
/// byte is read.
pub(crate) async fn relay<S, E>(
    ctx: AppContext,
    key: StreamKey,
    remote_addr: Option<String>,
    chunks: S,
) -> lc_core::Result<StreamSession>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: std::fmt::Display,
{
    let mut sink = ctx.lifecycle.on_publish(&key, remote_addr.clone()).await?;
    let counter = ctx.publishers.register(&key, remote_addr);
    let mut chunks = std::pin::pin!(chunks);

    loop {
        let chunk = tokio::select! {
            chunk = chunks.next() => chunk,
            _ = sink.closed() => {
                tracing::debug!(stream_key = %key, "Worker closed its input; dropping publisher");
                break;
            }
        };
        let Some(chunk) = chunk else { break };
        match chunk {
            Ok(chunk) if chunk.is_empty() => {}
            Ok(chunk) => {
                let len = chunk.len() as u64;
                if let Err(e) = sink.send(chunk).await {
                    tracing::warn!(stream_key = %key, "Dropping publisher: {e}");
                    break;
                }
                counter.fetch_add(len, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::debug!(stream_key = %key, "Publisher connection ended: {e}");
                break;
            }
        }
    }

    ctx.publishers.remove(&key);
    ctx.lifecycle.on_unpublish(sink).await
}

/// PUT|POST /live/{key} (ingest control port)
///
/// Completes when the publisher disconnects, with the resulting session.
/// The relay runs in its own task so the stop happens even if the client
/// vanishes mid-request.
async fn publish(
    State(ctx): State<AppContext>,
    Path(key): Path<String>,
    request: Request,
) -> Result<Json<StreamSession>, AppError> {
    let key = key.parse::<StreamKey>()?;
    let remote_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string());
    let body = request.into_body().into_data_stream();

    let session = tokio::spawn(relay(ctx, key, remote_addr, body))
        .await
        .map_err(|e| Error::Internal(format!("ingest relay task failed: {e}")))??;
    Ok(Json(session))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_tracks_publishers() {
        let table = PublisherTable::default();
        let a: StreamKey = "a1".parse().unwrap();
        let b: StreamKey = "b2".parse().unwrap();

        let bytes = table.register(&a, Some("127.0.0.1:5000".into()));
        table.register(&b, None);
        bytes.fetch_add(42, Ordering::Relaxed);

        let list = table.list();
        assert_eq!(list.len(), 2);
        let first = list.iter().find(|p| p.stream_key == a).unwrap();
        assert_eq!(first.bytes_received, 42);
        assert_eq!(first.remote_addr.as_deref(), Some("127.0.0.1:5000"));

        table.remove(&a);
        assert_eq!(table.list().len(), 1);
    }
}
