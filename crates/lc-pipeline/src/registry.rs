//! Session registry: the active-session table plus per-key serialization.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use lc_core::{ChannelId, StreamKey, StreamSession, StreamState};
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Finished sessions kept for status and idempotent stop. Sessions awaiting a
/// persist retry are never evicted.
pub const MAX_FINISHED: usize = 1024;

/// Held while operating on one key; the key's lock entry is dropped with the
/// last holder.
pub struct KeyGuard<'a> {
    registry: &'a SessionRegistry,
    key: StreamKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.registry
            .locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

#[derive(Debug, Clone)]
struct FinishedEntry {
    session: StreamSession,
    owner: ChannelId,
    seq: u64,
}

/// An active session and who owns it.
#[derive(Debug, Clone)]
pub(crate) struct ActiveEntry {
    pub session: StreamSession,
    pub owner: ChannelId,
    /// Distinguishes restarts of the same key.
    pub attempt: u64,
}

/// Sessions by key.
///
/// All state-changing operations on one key run under [`Self::lock`], so
/// mutations for the same key never interleave while distinct keys proceed
/// in parallel. Finished sessions move to a history table so repeated stops
/// and status queries stay answerable; the history is capped at
/// [`MAX_FINISHED`].
pub struct SessionRegistry {
    locks: DashMap<StreamKey, Arc<Mutex<()>>>,
    active: DashMap<StreamKey, ActiveEntry>,
    finished: DashMap<StreamKey, FinishedEntry>,
    finished_limit: usize,
    next_attempt: AtomicU64,
    next_seq: AtomicU64,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::with_history_limit(MAX_FINISHED)
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_history_limit(finished_limit: usize) -> Self {
        Self {
            locks: DashMap::new(),
            active: DashMap::new(),
            finished: DashMap::new(),
            finished_limit,
            next_attempt: AtomicU64::new(0),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Serialize with every other operation on `key`.
    pub async fn lock(&self, key: &StreamKey) -> KeyGuard<'_> {
        let lock = Arc::clone(self.locks.entry(key.clone()).or_default().value());
        let guard = lock.lock_owned().await;
        KeyGuard {
            registry: self,
            key: key.clone(),
            guard: Some(guard),
        }
    }

    /// Keys with a live lock entry.
    pub fn locked_keys(&self) -> usize {
        self.locks.len()
    }

    pub fn finished_len(&self) -> usize {
        self.finished.len()
    }

    pub fn get(&self, key: &StreamKey) -> Option<StreamSession> {
        self.active_session(key).or_else(|| self.finished_session(key))
    }

    pub fn active_session(&self, key: &StreamKey) -> Option<StreamSession> {
        self.active.get(key).map(|e| e.session.clone())
    }

    pub fn finished_session(&self, key: &StreamKey) -> Option<StreamSession> {
        self.finished.get(key).map(|e| e.session.clone())
    }

    pub fn is_active(&self, key: &StreamKey) -> bool {
        self.active.contains_key(key)
    }

    pub fn list_active(&self) -> Vec<StreamSession> {
        let mut sessions: Vec<_> = self.active.iter().map(|e| e.session.clone()).collect();
        sessions.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        sessions
    }

    pub fn active_keys(&self) -> Vec<StreamKey> {
        self.active.iter().map(|e| e.key().clone()).collect()
    }

    pub(crate) fn active_entry(&self, key: &StreamKey) -> Option<ActiveEntry> {
        self.active.get(key).map(|e| e.value().clone())
    }

    pub(crate) fn finished_entry(&self, key: &StreamKey) -> Option<(StreamSession, ChannelId)> {
        self.finished
            .get(key)
            .map(|e| (e.session.clone(), e.owner.clone()))
    }

    /// Register `session` as active and return its attempt number.
    pub(crate) fn activate(&self, session: StreamSession, owner: ChannelId) -> u64 {
        let attempt = self.next_attempt.fetch_add(1, Ordering::Relaxed);
        self.finished.remove(&session.stream_key);
        self.active.insert(
            session.stream_key.clone(),
            ActiveEntry {
                session,
                owner,
                attempt,
            },
        );
        attempt
    }

    /// Mutate the active session for `key`, if there is one.
    pub(crate) fn update<R>(
        &self,
        key: &StreamKey,
        f: impl FnOnce(&mut StreamSession) -> R,
    ) -> Option<R> {
        self.active.get_mut(key).map(|mut e| f(&mut e.session))
    }

    /// Move `key` from the active table to history.
    pub(crate) fn retire(&self, key: &StreamKey) -> Option<StreamSession> {
        let (_, entry) = self.active.remove(key)?;
        self.push_finished(entry.session.clone(), entry.owner);
        Some(entry.session)
    }

    /// Record a terminal session that never became active.
    pub(crate) fn record_finished(&self, session: StreamSession, owner: ChannelId) {
        self.push_finished(session, owner);
    }

    /// Replace a finished session (after a persist retry).
    pub(crate) fn update_finished(&self, session: StreamSession) {
        if let Some(mut entry) = self.finished.get_mut(&session.stream_key) {
            entry.session = session;
        }
    }

    fn push_finished(&self, session: StreamSession, owner: ChannelId) {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.finished.insert(
            session.stream_key.clone(),
            FinishedEntry {
                session,
                owner,
                seq,
            },
        );

        while self.finished.len() > self.finished_limit {
            let oldest = self
                .finished
                .iter()
                .filter(|e| e.session.state != StreamState::StoppedUnpersisted)
                .min_by_key(|e| e.seq)
                .map(|e| e.key().clone());
            match oldest {
                Some(key) => {
                    self.finished.remove(&key);
                }
                None => break,
            }
        }
    }
}
