//! Async metadata store used by the stream lifecycle.
//!
//! The lifecycle only ever needs three operations on video records, so they
//! sit behind [`MetadataStore`]. [`SqliteMetadataStore`] runs the blocking
//! rusqlite queries on the blocking thread pool.

use async_trait::async_trait;
use lc_core::{Error, Result, StreamKey};

use crate::models::{VideoFilter, VideoPatch, VideoRecord};
use crate::pool::{get_conn, DbPool};
use crate::queries::videos;

/// Persistence of video records.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Insert a new record and return it.
    async fn create(&self, record: VideoRecord) -> Result<VideoRecord>;

    /// First record matching `filter`.
    async fn find_one(&self, filter: &VideoFilter) -> Result<Option<VideoRecord>>;

    /// Apply `patch` to the record with `id`; `None` if it does not exist.
    async fn find_by_id_and_update(
        &self,
        id: &StreamKey,
        patch: &VideoPatch,
    ) -> Result<Option<VideoRecord>>;
}

/// [`MetadataStore`] backed by the SQLite pool.
#[derive(Clone)]
pub struct SqliteMetadataStore {
    pool: DbPool,
}

impl SqliteMetadataStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&rusqlite::Connection) -> Result<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = get_conn(&pool)?;
            f(&conn)
        })
        .await
        .map_err(|e| Error::Internal(format!("spawn_blocking join error: {e}")))?
    }
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn create(&self, record: VideoRecord) -> Result<VideoRecord> {
        self.with_conn(move |conn| {
            videos::insert_video(conn, &record)?;
            Ok(record)
        })
        .await
    }

    async fn find_one(&self, filter: &VideoFilter) -> Result<Option<VideoRecord>> {
        let filter = filter.clone();
        self.with_conn(move |conn| videos::find_video(conn, &filter)).await
    }

    async fn find_by_id_and_update(
        &self,
        id: &StreamKey,
        patch: &VideoPatch,
    ) -> Result<Option<VideoRecord>> {
        let id = id.clone();
        let patch = patch.clone();
        self.with_conn(move |conn| videos::update_video(conn, &id, &patch))
            .await
    }
}
