//! Rust structs mapping to database tables.

use lc_core::{ChannelId, StreamKey};
use serde::{Deserialize, Serialize};

/// Value of `video_file` before a recording has been attached.
pub const NO_VIDEO_FILE: &str = "";

fn parse_text<T>(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<T>
where
    T: TryFrom<String, Error = lc_core::Error>,
{
    let s: String = row.get(idx)?;
    T::try_from(s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

// ---------------------------------------------------------------------------
// VideoRecord
// ---------------------------------------------------------------------------

/// A video. Live streams are videos with `live_stream = true` whose id is the
/// stream key; `video_file` is filled in once the recording is handed off.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct VideoRecord {
    pub id: StreamKey,
    pub video_file: String,
    pub thumbnail: String,
    pub title: String,
    pub description: String,
    pub duration: String,
    pub views: i64,
    pub is_published: bool,
    pub live_stream: bool,
    pub scheduled_at: Option<String>,
    pub channel_id: ChannelId,
    pub created_at: String,
    pub updated_at: String,
}

impl VideoRecord {
    pub fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: parse_text(row, 0)?,
            video_file: row.get(1)?,
            thumbnail: row.get(2)?,
            title: row.get(3)?,
            description: row.get(4)?,
            duration: row.get(5)?,
            views: row.get(6)?,
            is_published: row.get(7)?,
            live_stream: row.get(8)?,
            scheduled_at: row.get(9)?,
            channel_id: parse_text(row, 10)?,
            created_at: row.get(11)?,
            updated_at: row.get(12)?,
        })
    }

    /// Whether a recording has already been attached.
    pub fn has_recording(&self) -> bool {
        !self.video_file.trim().is_empty()
    }
}

// ---------------------------------------------------------------------------
// Filters and patches
// ---------------------------------------------------------------------------

/// Equality filter; unset fields match anything.
#[derive(Debug, Clone, Default)]
pub struct VideoFilter {
    pub id: Option<StreamKey>,
    pub title: Option<String>,
    pub live_stream: Option<bool>,
}

impl VideoFilter {
    pub fn by_id(id: &StreamKey) -> Self {
        Self {
            id: Some(id.clone()),
            ..Self::default()
        }
    }

    pub fn live_by_title(title: &str) -> Self {
        Self {
            title: Some(title.to_string()),
            live_stream: Some(true),
            ..Self::default()
        }
    }
}

/// Partial update; unset fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct VideoPatch {
    pub video_file: Option<String>,
    pub channel_id: Option<ChannelId>,
}

impl VideoPatch {
    pub fn is_empty(&self) -> bool {
        self.video_file.is_none() && self.channel_id.is_none()
    }
}
