//! Stream lifecycle state machine.
//!
//! [`StreamLifecycle`] ties the collaborators together: it validates and
//! schedules streams against the metadata store, starts and stops workers
//! through the [`TranscodeSupervisor`], finalizes recordings and hands them
//! off. Each start spawns a monitor task that follows the worker's status
//! channel and drives `Connecting -> Live`, reports segment progress, and
//! reacts to the worker failing or exiting on its own.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use lc_av::{finalize_recording, ToolConfig, TranscodeSupervisor, WorkerPhase, WorkerStatus};
use lc_core::events::{EventBus, StreamEventPayload};
use lc_core::{
    ChannelId, Error, Result, StreamDirectories, StreamKey, StreamSession, StreamState,
};
use lc_db::{MetadataStore, VideoFilter, VideoRecord, NO_VIDEO_FILE};
use lc_storage::ObjectStorage;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;

use crate::handoff::hand_off;
use crate::registry::SessionRegistry;

/// Fields of a new live stream supplied by the broadcaster.
#[derive(Debug, Clone, Default)]
pub struct NewLiveStream {
    pub title: String,
    pub description: String,
    pub duration: String,
    pub scheduled_at: String,
}

impl NewLiveStream {
    fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("title", &self.title),
            ("description", &self.description),
            ("duration", &self.duration),
            ("scheduledAt", &self.scheduled_at),
        ] {
            if value.trim().is_empty() {
                return Err(Error::Validation(format!("{field} is required")));
            }
        }
        Ok(())
    }
}

/// Input side of a publish: relays container bytes to the worker.
pub struct PublishSink {
    key: StreamKey,
    tx: mpsc::Sender<Bytes>,
    bytes_received: u64,
}

impl PublishSink {
    pub fn stream_key(&self) -> &StreamKey {
        &self.key
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    /// Resolves once the worker stops accepting input (stopped, failed or
    /// shut down).
    pub async fn closed(&self) {
        self.tx.closed().await
    }

    /// Forward one chunk. Fails once the worker stops reading.
    pub async fn send(&mut self, chunk: Bytes) -> Result<()> {
        let len = chunk.len() as u64;
        self.tx
            .send(chunk)
            .await
            .map_err(|_| Error::process(&self.key, "worker is no longer accepting input"))?;
        self.bytes_received += len;
        Ok(())
    }
}

/// Orchestrates stream sessions. Cheap to clone.
#[derive(Clone)]
pub struct StreamLifecycle {
    store: Arc<dyn MetadataStore>,
    storage: Arc<dyn ObjectStorage>,
    dirs: StreamDirectories,
    supervisor: Arc<TranscodeSupervisor>,
    registry: Arc<SessionRegistry>,
    events: Arc<EventBus>,
    stop_grace: Duration,
}

impl StreamLifecycle {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        storage: Arc<dyn ObjectStorage>,
        dirs: StreamDirectories,
        supervisor: Arc<TranscodeSupervisor>,
        events: Arc<EventBus>,
        stop_grace: Duration,
    ) -> Self {
        Self {
            store,
            storage,
            dirs,
            supervisor,
            registry: Arc::new(SessionRegistry::new()),
            events,
            stop_grace,
        }
    }

    pub fn directories(&self) -> &StreamDirectories {
        &self.dirs
    }

    pub fn supervisor(&self) -> &TranscodeSupervisor {
        &self.supervisor
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    fn tool(&self) -> &ToolConfig {
        self.supervisor.tool()
    }

    // -----------------------------------------------------------------------
    // Create
    // -----------------------------------------------------------------------

    /// Register a Scheduled stream for `channel`.
    ///
    /// The returned record's id is the stream key.
    pub async fn create(
        &self,
        channel: &ChannelId,
        input: NewLiveStream,
        thumbnail: Option<&Path>,
    ) -> Result<VideoRecord> {
        input.validate()?;
        let thumbnail =
            thumbnail.ok_or_else(|| Error::Validation("Thumbnail is required".into()))?;

        if self
            .store
            .find_one(&VideoFilter::live_by_title(input.title.trim()))
            .await?
            .is_some()
        {
            return Err(Error::Conflict("Video already exists".into()));
        }

        let uploaded = self.storage.upload(thumbnail).await?;

        let now = Utc::now().to_rfc3339();
        let record = VideoRecord {
            id: StreamKey::generate(),
            video_file: NO_VIDEO_FILE.to_string(),
            thumbnail: uploaded.url.clone(),
            title: input.title.trim().to_string(),
            description: input.description,
            duration: input.duration,
            views: 0,
            is_published: true,
            live_stream: true,
            scheduled_at: Some(input.scheduled_at),
            channel_id: channel.clone(),
            created_at: now.clone(),
            updated_at: now,
        };

        let record = match self.store.create(record).await {
            Ok(record) => record,
            Err(e) => {
                if let Err(cleanup) = self.storage.delete(&uploaded.url).await {
                    tracing::warn!(url = %uploaded.url, error = %cleanup, "Failed to delete orphaned thumbnail");
                }
                return Err(e);
            }
        };

        tracing::info!(stream_key = %record.id, channel = %channel, title = %record.title, "Stream scheduled");
        self.events.broadcast(StreamEventPayload::StreamScheduled {
            stream_key: record.id.clone(),
            title: record.title.clone(),
        });
        Ok(record)
    }

    // -----------------------------------------------------------------------
    // Start
    // -----------------------------------------------------------------------

    /// Start the worker for a Scheduled (or previously Failed) stream.
    pub async fn start(&self, key: &StreamKey) -> Result<StreamSession> {
        let _guard = self.registry.lock(key).await;
        self.start_locked(key).await
    }

    async fn start_locked(&self, key: &StreamKey) -> Result<StreamSession> {
        if self.registry.is_active(key) {
            return Err(Error::Conflict(format!("stream {key} is already active")));
        }

        let record = self
            .store
            .find_one(&VideoFilter::by_id(key))
            .await?
            .filter(|r| r.live_stream)
            .ok_or_else(|| Error::not_found("stream", key))?;

        let previous = self.registry.finished_session(key);
        if let Some(ref prev) = previous {
            if prev.state != StreamState::Failed {
                return Err(Error::Conflict(format!(
                    "stream {key} has already been recorded ({})",
                    prev.state
                )));
            }
        }
        if record.has_recording() {
            return Err(Error::Conflict(format!(
                "stream {key} has already been recorded"
            )));
        }

        let mut session = previous
            .unwrap_or_else(|| StreamSession::scheduled(key.clone(), &self.dirs.resolve(key)));
        let owner = record.channel_id;

        if let Err(e) = self.dirs.ensure_stream_dir(key).await {
            self.fail_inactive(session, owner, e.to_string());
            return Err(e);
        }

        let status = match self.supervisor.start(key).await {
            Ok(status) => status,
            Err(e @ Error::Conflict(_)) => return Err(e),
            Err(e) => {
                let diagnostic = match &e {
                    Error::Process { message, .. } => message.clone(),
                    other => other.to_string(),
                };
                self.fail_inactive(session, owner, diagnostic);
                return Err(e);
            }
        };

        let from = session.transition(StreamState::Connecting)?;
        session.segments = status.segments;
        let attempt = self.registry.activate(session.clone(), owner);
        self.announce(key, from, StreamState::Connecting, None);

        match self.supervisor.watch(key) {
            Some(rx) => {
                tokio::spawn(self.clone().monitor(key.clone(), attempt, rx));
            }
            // Worker already gone; make sure the session follows it.
            None => {
                let lifecycle = self.clone();
                let key = key.clone();
                tokio::spawn(async move {
                    let status = lifecycle.supervisor.observe(&key);
                    lifecycle.on_worker_finished(&key, attempt, status).await;
                });
            }
        }

        Ok(session)
    }

    /// Record a start attempt that failed before a worker existed.
    fn fail_inactive(&self, mut session: StreamSession, owner: ChannelId, diagnostic: String) {
        tracing::error!(stream_key = %session.stream_key, diagnostic = %diagnostic, "Stream failed to start");
        let key = session.stream_key.clone();
        let from = session.state;
        if session.transition(StreamState::Failed).is_ok() {
            session.diagnostic = Some(diagnostic.clone());
            self.registry.record_finished(session, owner);
            self.supervisor.forget(&key);
            self.announce(&key, from, StreamState::Failed, Some(diagnostic));
        }
    }

    // -----------------------------------------------------------------------
    // Monitor
    // -----------------------------------------------------------------------

    async fn monitor(self, key: StreamKey, attempt: u64, mut rx: watch::Receiver<WorkerStatus>) {
        let mut seen = rx.borrow().segments;
        let final_status = loop {
            let status = rx.borrow_and_update().clone();

            if status.segments != seen {
                seen = status.segments;
                self.registry.update(&key, |s| s.segments = status.segments);
                self.events.broadcast(StreamEventPayload::SegmentsAvailable {
                    stream_key: key.clone(),
                    count: status.segments,
                });
            }
            if status.phase == WorkerPhase::Live {
                self.mark_live(&key, attempt);
            }
            if status.phase.is_terminal() {
                break Some(status);
            }
            if rx.changed().await.is_err() {
                break self.supervisor.observe(&key);
            }
        };
        self.on_worker_finished(&key, attempt, final_status).await;
    }

    fn mark_live(&self, key: &StreamKey, attempt: u64) {
        let Some(entry) = self.registry.active_entry(key) else {
            return;
        };
        if entry.attempt != attempt || entry.session.state != StreamState::Connecting {
            return;
        }
        let changed = self
            .registry
            .update(key, |s| {
                s.state == StreamState::Connecting && s.transition(StreamState::Live).is_ok()
            })
            .unwrap_or(false);
        if changed {
            tracing::info!(stream_key = %key, "Stream is live");
            self.announce(key, StreamState::Connecting, StreamState::Live, None);
        }
    }

    async fn on_worker_finished(&self, key: &StreamKey, attempt: u64, status: Option<WorkerStatus>) {
        let failed = status
            .as_ref()
            .map_or(true, |s| s.phase == WorkerPhase::Failed);
        if failed {
            let diagnostic = status
                .and_then(|s| s.diagnostic)
                .unwrap_or_else(|| "worker exited without a status".into());
            self.fail_active(key, attempt, diagnostic).await;
        } else if let Err(e) = self.stop_attempt(key, Some(attempt)).await {
            tracing::warn!(stream_key = %key, error = %e, "Stopping after worker exit failed");
        }
    }

    /// Mark an active session Failed after its worker died.
    async fn fail_active(&self, key: &StreamKey, attempt: u64, diagnostic: String) {
        let _guard = self.registry.lock(key).await;
        let Some(entry) = self.registry.active_entry(key) else {
            return;
        };
        // A concurrent stop owns the Stopping path.
        if entry.attempt != attempt || entry.session.state == StreamState::Stopping {
            return;
        }
        self.finish_failed(key, diagnostic);
    }

    fn finish_failed(&self, key: &StreamKey, diagnostic: String) {
        let from = self
            .registry
            .update(key, |s| {
                let from = s.state;
                s.transition(StreamState::Failed).ok()?;
                s.diagnostic = Some(diagnostic.clone());
                Some(from)
            })
            .flatten();
        if let Some(from) = from {
            tracing::error!(stream_key = %key, diagnostic = %diagnostic, "Stream failed");
            self.retire(key);
            self.announce(key, from, StreamState::Failed, Some(diagnostic));
        }
    }

    // -----------------------------------------------------------------------
    // Ingest
    // -----------------------------------------------------------------------

    /// A publisher connected for `key`.
    ///
    /// A Scheduled stream is started; a stream started through the control
    /// surface is attached to. A second publisher gets `Conflict`.
    pub async fn on_publish(
        &self,
        key: &StreamKey,
        remote_addr: Option<String>,
    ) -> Result<PublishSink> {
        let _guard = self.registry.lock(key).await;
        match self.registry.active_session(key) {
            None => {
                self.start_locked(key).await?;
            }
            Some(session) if session.state == StreamState::Stopping => {
                return Err(Error::Conflict(format!("stream {key} is stopping")));
            }
            Some(_) => {}
        }

        let tx = self.supervisor.take_input(key)?;
        tracing::info!(stream_key = %key, remote_addr = ?remote_addr, "Publisher connected");
        self.events.broadcast(StreamEventPayload::PublishStarted {
            stream_key: key.clone(),
            remote_addr,
        });
        Ok(PublishSink {
            key: key.clone(),
            tx,
            bytes_received: 0,
        })
    }

    /// The publisher for `key` went away; stop the stream.
    pub async fn on_unpublish(&self, sink: PublishSink) -> Result<StreamSession> {
        let PublishSink {
            key,
            tx,
            bytes_received,
        } = sink;
        drop(tx);
        tracing::info!(stream_key = %key, bytes = bytes_received, "Publisher disconnected");
        self.events.broadcast(StreamEventPayload::PublishStopped {
            stream_key: key.clone(),
            bytes_received,
        });
        self.stop(&key).await
    }

    // -----------------------------------------------------------------------
    // Stop / persist
    // -----------------------------------------------------------------------

    /// Stop the stream and finalize its recording.
    ///
    /// Returns the terminal session: `Stopped`, `StoppedUnpersisted` (handoff
    /// failed, retry with [`Self::persist`]) or `Failed`. Stopping a finished
    /// stream returns its session unchanged.
    pub async fn stop(&self, key: &StreamKey) -> Result<StreamSession> {
        self.stop_attempt(key, None).await
    }

    async fn stop_attempt(&self, key: &StreamKey, attempt: Option<u64>) -> Result<StreamSession> {
        let _guard = self.registry.lock(key).await;

        let Some(entry) = self.registry.active_entry(key) else {
            return self
                .registry
                .finished_session(key)
                .ok_or_else(|| Error::not_found("active stream", key));
        };
        if attempt.is_some_and(|a| a != entry.attempt) {
            return Ok(entry.session);
        }

        let from = self
            .registry
            .update(key, |s| s.transition(StreamState::Stopping))
            .transpose()?;
        if let Some(from) = from {
            tracing::info!(stream_key = %key, "Stopping stream");
            self.announce(key, from, StreamState::Stopping, None);
        }

        let status = match self.supervisor.stop(key, self.stop_grace).await {
            Ok(status) => status,
            Err(e) => WorkerStatus {
                phase: WorkerPhase::Failed,
                segments: entry.session.segments,
                exit_code: None,
                diagnostic: Some(e.to_string()),
            },
        };
        self.registry.update(key, |s| s.segments = status.segments);

        if status.phase == WorkerPhase::Failed {
            let diagnostic = status
                .diagnostic
                .unwrap_or_else(|| "worker failed".into());
            self.finish_failed(key, diagnostic);
            return self.finished(key);
        }

        let paths = self.dirs.resolve(key);
        let mut artifact = match finalize_recording(self.tool(), key, &paths).await {
            Ok(artifact) => artifact,
            Err(e) => {
                self.finish_failed(key, format!("no recording produced: {e}"));
                return self.finished(key);
            }
        };

        let handoff = hand_off(
            self.store.as_ref(),
            self.storage.as_ref(),
            key,
            &entry.owner,
            &mut artifact,
        )
        .await;
        let url = artifact.url.clone();
        let (next, diagnostic) = match handoff {
            Ok(_) => (StreamState::Stopped, None),
            Err(e) => (StreamState::StoppedUnpersisted, Some(e.to_string())),
        };
        self.registry.update(key, |s| -> Result<()> {
            s.transition(next)?;
            s.artifact = Some(artifact);
            s.diagnostic = diagnostic.clone();
            Ok(())
        })
        .transpose()?;
        self.retire(key);

        match next {
            StreamState::Stopped => tracing::info!(stream_key = %key, url = ?url, "Stream stopped"),
            _ => tracing::warn!(
                stream_key = %key,
                diagnostic = diagnostic.as_deref().unwrap_or(""),
                "Stream stopped but the recording was not persisted"
            ),
        }
        self.announce(key, StreamState::Stopping, next, diagnostic);
        if next == StreamState::Stopped {
            if let Some(url) = url {
                self.events.broadcast(StreamEventPayload::RecordingPersisted {
                    stream_key: key.clone(),
                    url,
                });
            }
        }
        self.finished(key)
    }

    /// Move `key` to history; the worker's own status is no longer needed.
    fn retire(&self, key: &StreamKey) {
        self.registry.retire(key);
        self.supervisor.forget(key);
    }

    fn finished(&self, key: &StreamKey) -> Result<StreamSession> {
        self.registry
            .finished_session(key)
            .ok_or_else(|| Error::Internal(format!("stream {key} vanished from history")))
    }

    /// Retry the handoff of a `StoppedUnpersisted` stream.
    ///
    /// On failure the session stays `StoppedUnpersisted` with an updated
    /// diagnostic; a `Stopped` stream is returned unchanged.
    pub async fn persist(&self, key: &StreamKey) -> Result<StreamSession> {
        let _guard = self.registry.lock(key).await;

        if self.registry.is_active(key) {
            return Err(Error::Conflict(format!("stream {key} is still active")));
        }
        let (mut session, owner) = self
            .registry
            .finished_entry(key)
            .ok_or_else(|| Error::not_found("stopped stream", key))?;
        match session.state {
            StreamState::Stopped => return Ok(session),
            StreamState::StoppedUnpersisted => {}
            other => {
                return Err(Error::Conflict(format!(
                    "stream {key} cannot be persisted from state {other}"
                )))
            }
        }
        let Some(mut artifact) = session.artifact.clone() else {
            return Err(Error::Internal(format!("stream {key} has no recording")));
        };

        match hand_off(
            self.store.as_ref(),
            self.storage.as_ref(),
            key,
            &owner,
            &mut artifact,
        )
        .await
        {
            Ok(_) => {
                session.transition(StreamState::Stopped)?;
                session.diagnostic = None;
                let url = artifact.url.clone();
                session.artifact = Some(artifact);
                self.registry.update_finished(session.clone());
                tracing::info!(stream_key = %key, "Recording persisted on retry");
                self.announce(key, StreamState::StoppedUnpersisted, StreamState::Stopped, None);
                if let Some(url) = url {
                    self.events.broadcast(StreamEventPayload::RecordingPersisted {
                        stream_key: key.clone(),
                        url,
                    });
                }
            }
            Err(e) => {
                tracing::warn!(stream_key = %key, error = %e, "Persist retry failed");
                session.diagnostic = Some(e.to_string());
                session.artifact = Some(artifact);
                self.registry.update_finished(session.clone());
            }
        }
        Ok(session)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Current session for `key`, including Scheduled streams that were
    /// never started.
    pub async fn status(&self, key: &StreamKey) -> Result<StreamSession> {
        if let Some(session) = self.registry.get(key) {
            return Ok(session);
        }
        match self.store.find_one(&VideoFilter::by_id(key)).await? {
            Some(record) if record.live_stream => {
                let mut session = StreamSession::scheduled(key.clone(), &self.dirs.resolve(key));
                // Recorded streams that aged out of the session history.
                if record.has_recording() {
                    session.state = StreamState::Stopped;
                }
                Ok(session)
            }
            _ => Err(Error::not_found("stream", key)),
        }
    }

    pub fn list_active(&self) -> Vec<StreamSession> {
        self.registry.list_active()
    }

    /// Stop every active stream. Used on process shutdown.
    pub async fn shutdown(&self) {
        let keys = self.registry.active_keys();
        if keys.is_empty() {
            return;
        }
        tracing::info!(count = keys.len(), "Stopping active streams");

        let mut set = JoinSet::new();
        for key in keys {
            let lifecycle = self.clone();
            set.spawn(async move {
                let result = lifecycle.stop(&key).await;
                (key, result)
            });
        }
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((key, Ok(session))) => {
                    tracing::info!(stream_key = %key, state = %session.state, "Stream stopped on shutdown")
                }
                Ok((key, Err(e))) => {
                    tracing::warn!(stream_key = %key, error = %e, "Failed to stop stream on shutdown")
                }
                Err(e) => tracing::warn!(error = %e, "Shutdown task panicked"),
            }
        }
    }

    fn announce(
        &self,
        key: &StreamKey,
        from: StreamState,
        to: StreamState,
        diagnostic: Option<String>,
    ) {
        tracing::debug!(stream_key = %key, %from, %to, "State changed");
        self.events.broadcast(StreamEventPayload::StateChanged {
            stream_key: key.clone(),
            from,
            to,
            diagnostic,
        });
    }
}
