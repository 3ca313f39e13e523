//! RTMP publish port.
//!
//! Each TCP connection runs an `rtmp` server session that publishes into a
//! shared [`StreamsHub`]. A watcher follows the hub's publish/unpublish
//! broadcasts: on publish it subscribes to the stream's frames, muxes them
//! to FLV and relays the bytes into the lifecycle like any other publisher;
//! on unpublish it ends that relay.
//!
//! Publishes to an application other than `ingest.app_name`, or with a key
//! the lifecycle refuses, are logged and their media is dropped.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use futures::Stream;
use lc_core::{Error, StreamKey};
use parking_lot::Mutex;
use rtmp::session::server_session::ServerSession;
use streamhub::define::{
    BroadcastEvent, BroadcastEventReceiver, FrameDataReceiver, NotifyInfo, StreamHubEvent,
    StreamHubEventSender, SubDataType, SubscribeType, SubscriberInfo,
};
use streamhub::stream::StreamIdentifier;
use streamhub::utils::{RandomDigitCount, Uuid};
use streamhub::StreamsHub;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, oneshot};
use tokio_util::sync::CancellationToken;

use super::flv::FlvTagWriter;
use crate::context::AppContext;

/// GOPs the hub caches for late subscribers; one keyframe is enough for the
/// transcoder to start from.
const GOP_NUM: usize = 1;

/// Relays running for hub streams, keyed by RTMP stream name.
#[derive(Clone, Default)]
struct ActiveRelays(Arc<Mutex<RelayTable>>);

#[derive(Default)]
struct RelayTable {
    next_id: u64,
    entries: HashMap<String, (u64, CancellationToken)>,
}

impl ActiveRelays {
    /// Register a relay for `stream_name`, cancelling any previous one.
    fn insert(&self, stream_name: &str) -> (u64, CancellationToken) {
        let mut table = self.0.lock();
        table.next_id += 1;
        let id = table.next_id;
        let token = CancellationToken::new();
        if let Some((_, old)) = table
            .entries
            .insert(stream_name.to_owned(), (id, token.clone()))
        {
            old.cancel();
        }
        (id, token)
    }

    fn cancel(&self, stream_name: &str) {
        if let Some((_, token)) = self.0.lock().entries.remove(stream_name) {
            token.cancel();
        }
    }

    /// Drop the entry only if it still belongs to relay `id`.
    fn finish(&self, stream_name: &str, id: u64) {
        let mut table = self.0.lock();
        if table
            .entries
            .get(stream_name)
            .is_some_and(|(current, _)| *current == id)
        {
            table.entries.remove(stream_name);
        }
    }
}

/// Map an RTMP publish target to a stream key.
///
/// `stream_name` may carry a query string (`key?token=...`), which is
/// ignored.
pub fn publish_key(
    expected_app: &str,
    app_name: &str,
    stream_name: &str,
) -> lc_core::Result<StreamKey> {
    if app_name != expected_app {
        return Err(Error::Validation(format!(
            "RTMP application '{app_name}' is not '{expected_app}'"
        )));
    }
    let name = stream_name.split('?').next().unwrap_or_default();
    name.parse()
}

/// Accept RTMP connections on `listener` until `stop` fires.
pub async fn serve_rtmp(
    ctx: AppContext,
    listener: TcpListener,
    stop: CancellationToken,
) -> lc_core::Result<()> {
    let mut hub = StreamsHub::new(None);
    let hub_sender = hub.get_hub_event_sender();
    let events = hub.get_client_event_consumer();
    let hub_task = tokio::spawn(async move {
        hub.run().await;
        tracing::debug!("RTMP stream hub stopped");
    });
    let watcher = tokio::spawn(watch_publishers(ctx, hub_sender.clone(), events));

    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            _ = stop.cancelled() => break,
        };
        let (tcp, peer) = match accepted {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!("RTMP accept failed: {e}");
                continue;
            }
        };
        tracing::debug!(%peer, "RTMP connection");
        let mut session = ServerSession::new(tcp, hub_sender.clone(), GOP_NUM, None);
        tokio::spawn(async move {
            if let Err(e) = session.run().await {
                tracing::debug!(%peer, "RTMP session ended: {e}");
            }
        });
    }

    watcher.abort();
    hub_task.abort();
    Ok(())
}

/// Follow hub publish/unpublish broadcasts and drive one relay per stream.
async fn watch_publishers(
    ctx: AppContext,
    hub: StreamHubEventSender,
    mut events: BroadcastEventReceiver,
) {
    let relays = ActiveRelays::default();
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!("RTMP watcher missed {n} hub events");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        match event {
            BroadcastEvent::Publish { identifier, .. } => {
                let StreamIdentifier::Rtmp {
                    app_name,
                    stream_name,
                } = identifier
                else {
                    continue;
                };
                let key = match publish_key(&ctx.config.ingest.app_name, &app_name, &stream_name)
                {
                    Ok(key) => key,
                    Err(e) => {
                        tracing::warn!(%app_name, %stream_name, "Ignoring RTMP publish: {e}");
                        continue;
                    }
                };
                tracing::info!(stream_key = %key, "RTMP publish started");
                let (id, token) = relays.insert(&stream_name);
                tokio::spawn(relay_stream(
                    ctx.clone(),
                    hub.clone(),
                    relays.clone(),
                    (app_name, stream_name),
                    key,
                    (id, token),
                ));
            }
            BroadcastEvent::UnPublish { identifier, .. } => {
                if let StreamIdentifier::Rtmp { stream_name, .. } = identifier {
                    relays.cancel(&stream_name);
                }
            }
            #[allow(unreachable_patterns)]
            _ => {}
        }
    }
}

async fn relay_stream(
    ctx: AppContext,
    hub: StreamHubEventSender,
    relays: ActiveRelays,
    (app_name, stream_name): (String, String),
    key: StreamKey,
    (id, stop): (u64, CancellationToken),
) {
    let subscriber = Uuid::new(RandomDigitCount::Four);
    let identifier = || StreamIdentifier::Rtmp {
        app_name: app_name.clone(),
        stream_name: stream_name.clone(),
    };

    match subscribe(&hub, identifier(), subscriber_info(subscriber, &stream_name)).await {
        Ok(frames) => {
            match super::relay(ctx, key.clone(), None, flv_chunks(frames, stop)).await {
                Ok(session) => {
                    tracing::info!(stream_key = %key, state = ?session.state, "RTMP publish ended")
                }
                Err(e) => tracing::warn!(stream_key = %key, "RTMP publish refused: {e}"),
            }
            let _ = hub.send(StreamHubEvent::UnSubscribe {
                identifier: identifier(),
                info: subscriber_info(subscriber, &stream_name),
            });
        }
        Err(e) => tracing::warn!(stream_key = %key, "RTMP subscribe failed: {e}"),
    }
    relays.finish(&stream_name, id);
}

fn subscriber_info(id: Uuid, stream_name: &str) -> SubscriberInfo {
    SubscriberInfo {
        id,
        sub_type: SubscribeType::RtmpRemux2HttpFlv,
        sub_data_type: SubDataType::Frame,
        notify_info: NotifyInfo {
            request_url: format!("/live/{stream_name}"),
            remote_addr: String::new(),
        },
    }
}

async fn subscribe(
    hub: &StreamHubEventSender,
    identifier: StreamIdentifier,
    info: SubscriberInfo,
) -> lc_core::Result<FrameDataReceiver> {
    let (result_tx, result_rx) = oneshot::channel();
    hub.send(StreamHubEvent::Subscribe {
        identifier,
        info,
        result_sender: result_tx,
    })
    .map_err(|_| Error::Internal("RTMP stream hub is gone".into()))?;

    let subscription = result_rx
        .await
        .map_err(|_| Error::Internal("RTMP stream hub dropped the subscription".into()))?
        .map_err(|e| Error::Internal(format!("RTMP subscribe: {e:?}")))?;
    subscription
        .0
        .frame_receiver
        .ok_or_else(|| Error::Internal("RTMP subscription has no frame receiver".into()))
}

/// FLV bytes for a subscription, ending when the publisher goes away or
/// `stop` fires.
fn flv_chunks(
    mut frames: FrameDataReceiver,
    stop: CancellationToken,
) -> impl Stream<Item = lc_core::Result<Bytes>> + Send {
    async_stream::stream! {
        let mut writer = FlvTagWriter::new();
        loop {
            let frame = tokio::select! {
                frame = frames.recv() => frame,
                _ = stop.cancelled() => None,
            };
            let Some(frame) = frame else { break };
            match writer.push(frame) {
                Ok(Some(bytes)) => yield Ok(bytes),
                Ok(None) => {}
                Err(e) => {
                    yield Err(e);
                    break;
                }
            }
        }
    }
}

/// Address the RTMP port is reachable on, for logs.
pub fn rtmp_url(addr: SocketAddr, app_name: &str) -> String {
    format!("rtmp://{addr}/{app_name}/{{key}}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_key_checks_app_and_strips_query() {
        let key = publish_key("live", "live", "abc123?token=xyz").unwrap();
        assert_eq!(key.as_str(), "abc123");

        let err = publish_key("live", "other", "abc123").unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        assert!(publish_key("live", "live", "bad key").is_err());
        assert!(publish_key("live", "live", "").is_err());
    }

    #[test]
    fn relays_are_replaced_and_finished() {
        let relays = ActiveRelays::default();
        let (first_id, first) = relays.insert("abc123");
        let (second_id, second) = relays.insert("abc123");
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());

        // A stale relay finishing does not drop the new one.
        relays.finish("abc123", first_id);
        assert_eq!(relays.0.lock().entries.len(), 1);
        relays.cancel("abc123");
        assert!(second.is_cancelled());

        let (third_id, _) = relays.insert("abc123");
        relays.finish("abc123", third_id);
        assert!(relays.0.lock().entries.is_empty());
        assert!(third_id > second_id);
    }

    #[test]
    fn rtmp_url_names_the_app() {
        let addr: SocketAddr = "127.0.0.1:1935".parse().unwrap();
        assert_eq!(rtmp_url(addr, "live"), "rtmp://127.0.0.1:1935/live/{key}");
    }
}
