//! In-memory collaborators for lifecycle tests.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use lc_core::{ChannelId, Error, Result, StreamKey};
use lc_db::{MetadataStore, VideoFilter, VideoPatch, VideoRecord, NO_VIDEO_FILE};
use lc_storage::{ObjectStorage, StoredObject};
use parking_lot::Mutex;

pub fn live_record(id: &str, title: &str) -> VideoRecord {
    VideoRecord {
        id: id.parse().unwrap(),
        video_file: NO_VIDEO_FILE.into(),
        thumbnail: "/uploads/thumb.png".into(),
        title: title.into(),
        description: "desc".into(),
        duration: "60".into(),
        views: 0,
        is_published: true,
        live_stream: true,
        scheduled_at: Some("2026-01-01T00:00:00Z".into()),
        channel_id: "chan1".parse().unwrap(),
        created_at: "2026-01-01T00:00:00Z".into(),
        updated_at: "2026-01-01T00:00:00Z".into(),
    }
}

#[derive(Default)]
pub struct MemoryStore {
    pub records: Mutex<HashMap<StreamKey, VideoRecord>>,
    pub fail_updates: AtomicBool,
    pub fail_creates: AtomicBool,
}

impl MemoryStore {
    pub fn with_live(id: &str) -> Self {
        let store = Self::default();
        store.insert(live_record(id, &format!("title {id}")));
        store
    }

    pub fn insert(&self, record: VideoRecord) {
        self.records.lock().insert(record.id.clone(), record);
    }

    pub fn get(&self, id: &str) -> Option<VideoRecord> {
        let key: StreamKey = id.parse().ok()?;
        self.records.lock().get(&key).cloned()
    }
}

#[async_trait]
impl MetadataStore for MemoryStore {
    async fn create(&self, record: VideoRecord) -> Result<VideoRecord> {
        if self.fail_creates.load(Ordering::SeqCst) {
            return Err(Error::database("disk full"));
        }
        self.insert(record.clone());
        Ok(record)
    }

    async fn find_one(&self, filter: &VideoFilter) -> Result<Option<VideoRecord>> {
        let records = self.records.lock();
        Ok(records
            .values()
            .find(|r| {
                filter.id.as_ref().map_or(true, |id| &r.id == id)
                    && filter.title.as_ref().map_or(true, |t| &r.title == t)
                    && filter.live_stream.map_or(true, |l| r.live_stream == l)
            })
            .cloned())
    }

    async fn find_by_id_and_update(
        &self,
        id: &StreamKey,
        patch: &VideoPatch,
    ) -> Result<Option<VideoRecord>> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(Error::database("connection lost"));
        }
        let mut records = self.records.lock();
        let Some(record) = records.get_mut(id) else {
            return Ok(None);
        };
        if let Some(ref file) = patch.video_file {
            record.video_file = file.clone();
        }
        if let Some(ref channel) = patch.channel_id {
            record.channel_id = channel.clone();
        }
        Ok(Some(record.clone()))
    }
}

/// Object storage that names uploads after the source file.
pub struct FlakyStorage {
    pub uploads: AtomicUsize,
    pub deletes: Mutex<Vec<String>>,
    pub fail: AtomicBool,
}

impl FlakyStorage {
    pub fn new() -> Self {
        Self {
            uploads: AtomicUsize::new(0),
            deletes: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        }
    }

    pub fn failing() -> Self {
        let storage = Self::new();
        storage.fail.store(true, Ordering::SeqCst);
        storage
    }
}

#[async_trait]
impl ObjectStorage for FlakyStorage {
    async fn upload(&self, local_path: &Path) -> Result<StoredObject> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::upstream(lc_storage::SERVICE, "bucket unavailable"));
        }
        self.uploads.fetch_add(1, Ordering::SeqCst);
        let name = local_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        Ok(StoredObject {
            url: format!("/uploads/{name}"),
            size_bytes: 0,
        })
    }

    async fn delete(&self, url: &str) -> Result<bool> {
        self.deletes.lock().push(url.to_string());
        Ok(true)
    }
}

pub fn owner() -> ChannelId {
    "chan1".parse().unwrap()
}
