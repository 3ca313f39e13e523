//! Video record operations.

use chrono::Utc;
use lc_core::{Error, Result, StreamKey};
use rusqlite::types::ToSql;
use rusqlite::Connection;

use crate::models::{VideoFilter, VideoPatch, VideoRecord};

const COLS: &str = "id, video_file, thumbnail, title, description, duration, views,
    is_published, live_stream, scheduled_at, channel_id, created_at, updated_at";

/// Insert a new video. Fails with `Conflict` if the id is taken.
pub fn insert_video(conn: &Connection, video: &VideoRecord) -> Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO videos ({COLS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
        ),
        rusqlite::params![
            video.id.as_str(),
            video.video_file,
            video.thumbnail,
            video.title,
            video.description,
            video.duration,
            video.views,
            video.is_published,
            video.live_stream,
            video.scheduled_at,
            video.channel_id.as_str(),
            video.created_at,
            video.updated_at,
        ],
    )
    .map_err(|e| match e {
        rusqlite::Error::SqliteFailure(ref f, _)
            if f.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Error::Conflict(format!("video {} already exists", video.id))
        }
        e => Error::database(e.to_string()),
    })?;
    Ok(())
}

/// Get a video by id.
pub fn get_video(conn: &Connection, id: &StreamKey) -> Result<Option<VideoRecord>> {
    find_video(conn, &VideoFilter::by_id(id))
}

/// Return the first video matching `filter` (oldest first).
pub fn find_video(conn: &Connection, filter: &VideoFilter) -> Result<Option<VideoRecord>> {
    let mut clauses: Vec<String> = Vec::new();
    let mut params: Vec<Box<dyn ToSql>> = Vec::new();

    if let Some(ref id) = filter.id {
        params.push(Box::new(id.as_str().to_string()));
        clauses.push(format!("id = ?{}", params.len()));
    }
    if let Some(ref title) = filter.title {
        params.push(Box::new(title.clone()));
        clauses.push(format!("title = ?{}", params.len()));
    }
    if let Some(live) = filter.live_stream {
        params.push(Box::new(live));
        clauses.push(format!("live_stream = ?{}", params.len()));
    }

    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };
    let q = format!("SELECT {COLS} FROM videos {where_sql} ORDER BY created_at ASC LIMIT 1");

    let params_refs: Vec<&dyn ToSql> = params.iter().map(|b| b.as_ref()).collect();
    match conn.query_row(&q, params_refs.as_slice(), VideoRecord::from_row) {
        Ok(v) => Ok(Some(v)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(Error::database(e.to_string())),
    }
}

/// Apply `patch` to the video and return the updated row, or `None` if no
/// video has that id.
pub fn update_video(
    conn: &Connection,
    id: &StreamKey,
    patch: &VideoPatch,
) -> Result<Option<VideoRecord>> {
    if patch.is_empty() {
        return get_video(conn, id);
    }

    let mut sets: Vec<String> = Vec::new();
    let mut params: Vec<Box<dyn ToSql>> = Vec::new();

    if let Some(ref file) = patch.video_file {
        params.push(Box::new(file.clone()));
        sets.push(format!("video_file = ?{}", params.len()));
    }
    if let Some(ref channel) = patch.channel_id {
        params.push(Box::new(channel.as_str().to_string()));
        sets.push(format!("channel_id = ?{}", params.len()));
    }

    params.push(Box::new(Utc::now().to_rfc3339()));
    sets.push(format!("updated_at = ?{}", params.len()));
    params.push(Box::new(id.as_str().to_string()));
    let q = format!("UPDATE videos SET {} WHERE id = ?{}", sets.join(", "), params.len());

    let params_refs: Vec<&dyn ToSql> = params.iter().map(|b| b.as_ref()).collect();
    let n = conn
        .execute(&q, params_refs.as_slice())
        .map_err(|e| Error::database(e.to_string()))?;
    if n == 0 {
        return Ok(None);
    }
    get_video(conn, id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{get_conn, init_memory_pool};

    fn sample(id: &str, title: &str) -> VideoRecord {
        let now = Utc::now().to_rfc3339();
        VideoRecord {
            id: id.parse().unwrap(),
            video_file: String::new(),
            thumbnail: "/uploads/thumb.png".into(),
            title: title.into(),
            description: "desc".into(),
            duration: "60".into(),
            views: 0,
            is_published: true,
            live_stream: true,
            scheduled_at: Some("2026-01-01T10:00:00Z".into()),
            channel_id: "chan-1".parse().unwrap(),
            created_at: now.clone(),
            updated_at: now,
        }
    }

    #[test]
    fn insert_and_get() {
        let pool = init_memory_pool().unwrap();
        let conn = get_conn(&pool).unwrap();
        let video = sample("abc123", "Launch");
        insert_video(&conn, &video).unwrap();

        let fetched = get_video(&conn, &video.id).unwrap().unwrap();
        assert_eq!(fetched, video);
        assert!(get_video(&conn, &"missing".parse().unwrap()).unwrap().is_none());
    }

    #[test]
    fn duplicate_id_is_conflict() {
        let pool = init_memory_pool().unwrap();
        let conn = get_conn(&pool).unwrap();
        insert_video(&conn, &sample("abc123", "A")).unwrap();
        let err = insert_video(&conn, &sample("abc123", "B")).unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[test]
    fn find_by_title_and_live_flag() {
        let pool = init_memory_pool().unwrap();
        let conn = get_conn(&pool).unwrap();
        let mut vod = sample("vod1", "Same");
        vod.live_stream = false;
        insert_video(&conn, &vod).unwrap();

        assert!(find_video(&conn, &VideoFilter::live_by_title("Same")).unwrap().is_none());
        insert_video(&conn, &sample("live1", "Same")).unwrap();
        let found = find_video(&conn, &VideoFilter::live_by_title("Same")).unwrap().unwrap();
        assert_eq!(found.id.as_str(), "live1");
    }

    #[test]
    fn update_returns_new_row() {
        let pool = init_memory_pool().unwrap();
        let conn = get_conn(&pool).unwrap();
        let video = sample("abc123", "Launch");
        insert_video(&conn, &video).unwrap();

        let patch = VideoPatch {
            video_file: Some("/uploads/abc123.mp4".into()),
            ..VideoPatch::default()
        };
        let updated = update_video(&conn, &video.id, &patch).unwrap().unwrap();
        assert_eq!(updated.video_file, "/uploads/abc123.mp4");
        assert!(updated.has_recording());
        assert_eq!(updated.title, "Launch");
    }

    #[test]
    fn empty_patch_leaves_row_untouched() {
        let pool = init_memory_pool().unwrap();
        let conn = get_conn(&pool).unwrap();
        let video = sample("abc123", "Launch");
        insert_video(&conn, &video).unwrap();
        let before = get_video(&conn, &video.id).unwrap().unwrap();

        let after = update_video(&conn, &video.id, &VideoPatch::default())
            .unwrap()
            .unwrap();
        assert_eq!(after.updated_at, before.updated_at);
        assert!(!after.has_recording());
    }

    #[test]
    fn update_missing_is_none() {
        let pool = init_memory_pool().unwrap();
        let conn = get_conn(&pool).unwrap();
        let result = update_video(&conn, &"nope".parse().unwrap(), &VideoPatch::default()).unwrap();
        assert!(result.is_none());
    }
}
