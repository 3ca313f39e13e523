//! Transcode supervisor: one ffmpeg worker per stream key.
//!
//! Each worker is driven by four tasks:
//!
//! - **input pump** relays published bytes from an `mpsc` channel to the
//!   worker's stdin; closing the channel (or [`TranscodeSupervisor::stop`])
//!   closes stdin so ffmpeg can flush and exit.
//! - **stderr collector** logs worker output and keeps a short tail used as
//!   the failure diagnostic.
//! - **segment watcher** polls the manifest and publishes the number of
//!   segments present on disk; the first new segment moves the worker from
//!   `Connecting` to `Live`.
//! - **reaper** owns the child process. It is the only place a worker
//!   leaves the table, and it does so exactly once, guarded by the worker's
//!   generation so a newer worker for the same key is never removed.
//!
//! Status is published through a `tokio::sync::watch` channel per worker;
//! the last status of every finished worker is kept so `stop` and `observe`
//! stay answerable after the process is gone.

use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use lc_core::playlist::MediaPlaylist;
use lc_core::{Error, Result, StreamDirectories, StreamKey};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, Command};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::hls::HlsSettings;
use crate::tools::ToolConfig;

/// Chunks buffered between a publisher and the worker's stdin.
const INPUT_QUEUE_DEPTH: usize = 64;

/// Worker stderr lines kept for diagnostics.
const STDERR_TAIL_LINES: usize = 20;

/// How long the reaper waits for the stderr collector to drain.
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Observable phase of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum WorkerPhase {
    /// Running, no new segment flushed yet.
    Connecting,
    /// At least one segment has been flushed.
    Live,
    /// Exited after its input closed or after a requested stop.
    Exited,
    /// Could not run, exited abnormally, or lost its input pipe.
    Failed,
}

impl WorkerPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, WorkerPhase::Exited | WorkerPhase::Failed)
    }
}

/// Point-in-time status of a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct WorkerStatus {
    pub phase: WorkerPhase,
    /// Segments listed in the manifest and present on disk.
    pub segments: usize,
    pub exit_code: Option<i32>,
    pub diagnostic: Option<String>,
}

impl WorkerStatus {
    fn connecting(segments: usize) -> Self {
        Self {
            phase: WorkerPhase::Connecting,
            segments,
            exit_code: None,
            diagnostic: None,
        }
    }

    fn failed(diagnostic: String) -> Self {
        Self {
            phase: WorkerPhase::Failed,
            segments: 0,
            exit_code: None,
            diagnostic: Some(diagnostic),
        }
    }
}

// ---------------------------------------------------------------------------
// Worker bookkeeping
// ---------------------------------------------------------------------------

/// Table entry for a running worker.
struct Worker {
    generation: u64,
    status: watch::Receiver<WorkerStatus>,
    input: Mutex<Option<mpsc::Sender<Bytes>>>,
    /// Close stdin (graceful stop).
    close_input: CancellationToken,
    /// Kill after the stop grace period ran out.
    terminate: CancellationToken,
}

/// State shared between a worker's tasks.
struct WorkerShared {
    key: StreamKey,
    status_tx: watch::Sender<WorkerStatus>,
    /// Segments already present when the worker started (restarts append).
    baseline: usize,
    stderr_tail: Mutex<VecDeque<String>>,
    input_error: Mutex<Option<String>>,
    /// Kill because the input pipe broke.
    abort: CancellationToken,
}

impl WorkerShared {
    fn observe_segments(&self, count: usize) {
        let baseline = self.baseline;
        let changed = self.status_tx.send_if_modified(|status| {
            if status.phase.is_terminal() || count <= status.segments {
                return false;
            }
            status.segments = count;
            if count > baseline {
                status.phase = WorkerPhase::Live;
            }
            true
        });
        if changed {
            tracing::debug!(stream_key = %self.key, segments = count, "Segments flushed");
        }
    }

    fn stderr_summary(&self) -> Option<String> {
        let tail = self.stderr_tail.lock();
        if tail.is_empty() {
            return None;
        }
        Some(tail.iter().cloned().collect::<Vec<_>>().join("\n"))
    }
}

// ---------------------------------------------------------------------------
// TranscodeSupervisor
// ---------------------------------------------------------------------------

/// Spawns, observes and stops one transcoding worker per stream key.
pub struct TranscodeSupervisor {
    tool: ToolConfig,
    settings: HlsSettings,
    dirs: StreamDirectories,
    poll_interval: Duration,
    workers: Arc<DashMap<StreamKey, Arc<Worker>>>,
    last_status: Arc<DashMap<StreamKey, WorkerStatus>>,
    next_generation: AtomicU64,
}

impl TranscodeSupervisor {
    pub fn new(
        tool: ToolConfig,
        settings: HlsSettings,
        dirs: StreamDirectories,
        poll_interval: Duration,
    ) -> Self {
        Self {
            tool,
            settings,
            dirs,
            poll_interval,
            workers: Arc::new(DashMap::new()),
            last_status: Arc::new(DashMap::new()),
            next_generation: AtomicU64::new(1),
        }
    }

    pub fn tool(&self) -> &ToolConfig {
        &self.tool
    }

    /// Spawn a worker for `key`.
    ///
    /// The stream directory must already exist. Fails with `Conflict` if a
    /// worker is running for `key`, and with `Process` if the worker cannot
    /// be spawned (the key is then observable as `Failed`).
    pub async fn start(&self, key: &StreamKey) -> Result<WorkerStatus> {
        let paths = self.dirs.resolve(key);
        if !tokio::fs::metadata(&paths.dir)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
        {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("stream directory {} does not exist", paths.dir.display()),
            )
            .into());
        }
        if self.workers.contains_key(key) {
            return Err(already_running(key));
        }
        let baseline = count_available_segments(&paths.manifest_path, &paths.dir).await;

        let vacant = match self.workers.entry(key.clone()) {
            Entry::Occupied(_) => return Err(already_running(key)),
            Entry::Vacant(v) => v,
        };

        let mut cmd = Command::new(&self.tool.path);
        cmd.args(&self.tool.prefix_args)
            .args(self.settings.args(&paths))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                drop(vacant);
                let message = format!("failed to spawn {}: {e}", self.tool.name);
                tracing::error!(stream_key = %key, "{message}");
                self.last_status
                    .insert(key.clone(), WorkerStatus::failed(message.clone()));
                return Err(Error::process(key, message));
            }
        };
        let (Some(stdin), Some(stderr)) = (child.stdin.take(), child.stderr.take()) else {
            drop(vacant);
            let _ = child.start_kill();
            return Err(Error::process(key, "worker stdio was not captured"));
        };

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let initial = WorkerStatus::connecting(baseline);
        let (status_tx, status_rx) = watch::channel(initial.clone());
        let (input_tx, input_rx) = mpsc::channel(INPUT_QUEUE_DEPTH);

        let worker = Arc::new(Worker {
            generation,
            status: status_rx,
            input: Mutex::new(Some(input_tx)),
            close_input: CancellationToken::new(),
            terminate: CancellationToken::new(),
        });
        let shared = Arc::new(WorkerShared {
            key: key.clone(),
            status_tx,
            baseline,
            stderr_tail: Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)),
            input_error: Mutex::new(None),
            abort: CancellationToken::new(),
        });

        vacant.insert(Arc::clone(&worker));
        self.last_status.remove(key);

        tracing::info!(
            stream_key = %key,
            pid = child.id().unwrap_or_default(),
            generation,
            "Worker started"
        );

        let done = CancellationToken::new();
        tokio::spawn(pump_input(
            stdin,
            input_rx,
            worker.close_input.clone(),
            Arc::clone(&shared),
        ));
        let stderr_task = tokio::spawn(collect_stderr(stderr, Arc::clone(&shared)));
        tokio::spawn(watch_segments(
            paths.manifest_path.clone(),
            paths.dir.clone(),
            self.poll_interval,
            Arc::clone(&shared),
            done.clone(),
        ));
        tokio::spawn(reap(Reaper {
            child,
            shared,
            terminate: worker.terminate.clone(),
            done,
            stderr_task,
            manifest_path: paths.manifest_path,
            dir: paths.dir,
            generation,
            workers: Arc::clone(&self.workers),
            last_status: Arc::clone(&self.last_status),
        }));

        Ok(initial)
    }

    /// Hand out the worker's input sender. Only one caller ever gets it.
    pub fn take_input(&self, key: &StreamKey) -> Result<mpsc::Sender<Bytes>> {
        let worker = self
            .workers
            .get(key)
            .map(|w| Arc::clone(w.value()))
            .ok_or_else(|| Error::not_found("worker", key))?;
        let sender = worker.input.lock().take();
        sender.ok_or_else(|| Error::Conflict(format!("stream {key} already has a publisher")))
    }

    /// Subscribe to status changes of the running worker for `key`.
    pub fn watch(&self, key: &StreamKey) -> Option<watch::Receiver<WorkerStatus>> {
        self.workers.get(key).map(|w| w.status.clone())
    }

    /// Current status of the running worker, or the last status of the
    /// most recent one.
    pub fn observe(&self, key: &StreamKey) -> Option<WorkerStatus> {
        if let Some(worker) = self.workers.get(key) {
            return Some(worker.status.borrow().clone());
        }
        self.last_status.get(key).map(|s| s.value().clone())
    }

    /// Drop the last known status of a finished worker once its outcome has
    /// been consumed. A running worker is unaffected.
    pub fn forget(&self, key: &StreamKey) {
        self.last_status.remove(key);
    }

    pub fn is_running(&self, key: &StreamKey) -> bool {
        self.workers.contains_key(key)
    }

    pub fn active_keys(&self) -> Vec<StreamKey> {
        self.workers.iter().map(|e| e.key().clone()).collect()
    }

    /// Stop the worker for `key`.
    ///
    /// Closes its input and waits up to `grace` for it to exit, then kills
    /// it. Calling this again (or for a worker that already exited) returns
    /// the last status without side effects.
    pub async fn stop(&self, key: &StreamKey, grace: Duration) -> Result<WorkerStatus> {
        let Some(worker) = self.workers.get(key).map(|w| Arc::clone(w.value())) else {
            return self
                .last_status
                .get(key)
                .map(|s| s.value().clone())
                .ok_or_else(|| Error::not_found("worker", key));
        };

        worker.close_input.cancel();
        let mut rx = worker.status.clone();

        match tokio::time::timeout(grace, wait_terminal(&mut rx)).await {
            Ok(status) => Ok(status),
            Err(_) => {
                tracing::warn!(
                    stream_key = %key,
                    grace_secs = grace.as_secs_f64(),
                    "Worker did not exit within grace period; killing"
                );
                worker.terminate.cancel();
                Ok(wait_terminal(&mut rx).await)
            }
        }
    }
}

fn already_running(key: &StreamKey) -> Error {
    Error::Conflict(format!("a worker is already running for stream {key}"))
}

async fn wait_terminal(rx: &mut watch::Receiver<WorkerStatus>) -> WorkerStatus {
    if let Ok(status) = rx.wait_for(|s| s.phase.is_terminal()).await {
        return status.clone();
    }
    // Sender gone: the reaper always publishes a terminal status first.
    rx.borrow().clone()
}

/// Number of manifest segments whose files exist; 0 if there is no manifest.
pub async fn count_available_segments(manifest: &Path, dir: &Path) -> usize {
    MediaPlaylist::read_available(manifest, dir)
        .await
        .map(|p| p.segments.len())
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Worker tasks
// ---------------------------------------------------------------------------

async fn pump_input(
    mut stdin: ChildStdin,
    mut rx: mpsc::Receiver<Bytes>,
    close: CancellationToken,
    shared: Arc<WorkerShared>,
) {
    let mut written: u64 = 0;
    loop {
        let chunk = tokio::select! {
            _ = close.cancelled() => {
                // Flush what the publisher already handed over.
                rx.close();
                let mut rest = Vec::new();
                while let Ok(chunk) = rx.try_recv() {
                    rest.push(chunk);
                }
                for chunk in rest {
                    if stdin.write_all(&chunk).await.is_err() {
                        break;
                    }
                }
                break;
            }
            chunk = rx.recv() => chunk,
        };
        let Some(chunk) = chunk else { break };
        if let Err(e) = stdin.write_all(&chunk).await {
            let message = format!("writing to worker input failed: {e}");
            tracing::warn!(stream_key = %shared.key, "{message}");
            *shared.input_error.lock() = Some(message);
            shared.abort.cancel();
            return;
        }
        written += chunk.len() as u64;
    }
    let _ = stdin.shutdown().await;
    tracing::debug!(stream_key = %shared.key, bytes = written, "Worker input closed");
}

async fn collect_stderr(stderr: ChildStderr, shared: Arc<WorkerShared>) {
    let mut lines = BufReader::new(stderr).split(b'\n');
    while let Ok(Some(raw)) = lines.next_segment().await {
        let line = String::from_utf8_lossy(&raw).trim_end().to_string();
        if line.is_empty() {
            continue;
        }
        tracing::debug!(stream_key = %shared.key, "ffmpeg: {line}");
        let mut tail = shared.stderr_tail.lock();
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }
}

async fn watch_segments(
    manifest: PathBuf,
    dir: PathBuf,
    interval: Duration,
    shared: Arc<WorkerShared>,
    done: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = done.cancelled() => break,
            _ = ticker.tick() => {
                let count = count_available_segments(&manifest, &dir).await;
                shared.observe_segments(count);
            }
        }
    }
}

struct Reaper {
    child: Child,
    shared: Arc<WorkerShared>,
    terminate: CancellationToken,
    done: CancellationToken,
    stderr_task: JoinHandle<()>,
    manifest_path: PathBuf,
    dir: PathBuf,
    generation: u64,
    workers: Arc<DashMap<StreamKey, Arc<Worker>>>,
    last_status: Arc<DashMap<StreamKey, WorkerStatus>>,
}

enum Exit {
    Finished(io::Result<ExitStatus>),
    Terminated(io::Result<ExitStatus>),
    Aborted(io::Result<ExitStatus>),
}

async fn reap(reaper: Reaper) {
    let Reaper {
        mut child,
        shared,
        terminate,
        done,
        stderr_task,
        manifest_path,
        dir,
        generation,
        workers,
        last_status,
    } = reaper;

    let exit = tokio::select! {
        status = child.wait() => Exit::Finished(status),
        _ = terminate.cancelled() => {
            let _ = child.start_kill();
            Exit::Terminated(child.wait().await)
        }
        _ = shared.abort.cancelled() => {
            let _ = child.start_kill();
            Exit::Aborted(child.wait().await)
        }
    };
    done.cancel();
    let _ = tokio::time::timeout(STDERR_DRAIN_TIMEOUT, stderr_task).await;

    let segments = count_available_segments(&manifest_path, &dir).await;
    shared.observe_segments(segments);
    let segments = shared.status_tx.borrow().segments;

    let input_error = shared.input_error.lock().clone();
    let stderr = shared.stderr_summary();
    let with_stderr = |summary: String| match &stderr {
        Some(tail) => format!("{summary}\n{tail}"),
        None => summary,
    };

    let status = match exit {
        Exit::Aborted(result) => WorkerStatus {
            phase: WorkerPhase::Failed,
            segments,
            exit_code: result.ok().and_then(|s| s.code()),
            diagnostic: Some(with_stderr(
                input_error.unwrap_or_else(|| "worker input failed".into()),
            )),
        },
        Exit::Terminated(result) => WorkerStatus {
            phase: WorkerPhase::Exited,
            segments,
            exit_code: result.ok().and_then(|s| s.code()),
            diagnostic: Some("killed after the stop grace period".into()),
        },
        Exit::Finished(Ok(status)) if status.success() => WorkerStatus {
            phase: WorkerPhase::Exited,
            segments,
            exit_code: status.code(),
            diagnostic: None,
        },
        Exit::Finished(Ok(status)) => WorkerStatus {
            phase: WorkerPhase::Failed,
            segments,
            exit_code: status.code(),
            diagnostic: Some(with_stderr(format!("worker exited with {status}"))),
        },
        Exit::Finished(Err(e)) => WorkerStatus {
            phase: WorkerPhase::Failed,
            segments,
            exit_code: None,
            diagnostic: Some(with_stderr(format!("waiting for worker failed: {e}"))),
        },
    };

    match status.phase {
        WorkerPhase::Failed => tracing::warn!(
            stream_key = %shared.key,
            exit_code = ?status.exit_code,
            diagnostic = status.diagnostic.as_deref().unwrap_or(""),
            "Worker failed"
        ),
        _ => tracing::info!(
            stream_key = %shared.key,
            exit_code = ?status.exit_code,
            segments,
            "Worker exited"
        ),
    }

    // History first, so the key is never observable as unknown.
    last_status.insert(shared.key.clone(), status.clone());
    shared.status_tx.send_replace(status);
    workers.remove_if(&shared.key, |_, w| w.generation == generation);
}
