//! Public HLS playback.
//!
//! No authentication and no diagnostics: anything that cannot be served is
//! a plain `404 Not Found`. The manifest is rebuilt from what is actually on
//! disk, so a viewer never sees a segment that is not there yet, and a
//! stream with no flushed segment has no manifest.

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use lc_core::playlist::MediaPlaylist;
use lc_core::StreamKey;
use tokio_util::io::ReaderStream;

use crate::context::AppContext;

pub const MANIFEST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";

fn not_found() -> Response {
    StatusCode::NOT_FOUND.into_response()
}

/// Content type for a playback file, by extension.
pub fn segment_content_type(file: &str) -> &'static str {
    match file.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase()) {
        Some(ext) if ext == "ts" => "video/mp2t",
        Some(ext) if ext == "m4s" => "video/iso.segment",
        Some(ext) if ext == "mp4" => "video/mp4",
        Some(ext) if ext == "m3u8" => MANIFEST_CONTENT_TYPE,
        _ => "application/octet-stream",
    }
}

/// GET /stream/{key}/index.m3u8
pub async fn manifest(State(ctx): State<AppContext>, Path(key): Path<String>) -> Response {
    let Ok(key) = key.parse::<StreamKey>() else {
        return not_found();
    };
    let paths = ctx.directories.resolve(&key);

    let playlist = match MediaPlaylist::read_available(&paths.manifest_path, &paths.dir).await {
        Ok(playlist) if !playlist.segments.is_empty() => playlist,
        Ok(_) => return not_found(),
        Err(e) => {
            tracing::trace!(stream_key = %key, "Manifest unavailable: {e}");
            return not_found();
        }
    };

    (
        [
            (header::CONTENT_TYPE, MANIFEST_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        playlist.render(),
    )
        .into_response()
}

/// GET /stream/{key}/{file}
pub async fn segment(
    State(ctx): State<AppContext>,
    Path((key, file)): Path<(String, String)>,
) -> Response {
    let Ok(key) = key.parse::<StreamKey>() else {
        return not_found();
    };
    let Some(path) = ctx.directories.segment_path(&key, &file) else {
        return not_found();
    };

    let handle = match tokio::fs::File::open(&path).await {
        Ok(f) => f,
        Err(_) => return not_found(),
    };
    let len = match handle.metadata().await {
        Ok(meta) if meta.is_file() => meta.len(),
        _ => return not_found(),
    };

    let mut response = Body::from_stream(ReaderStream::new(handle)).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(segment_content_type(&file)),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    response
}
