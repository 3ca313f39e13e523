//! Authenticated live-stream control.

use std::io::Write;

use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Extension, Json};
use lc_core::{Error, StreamKey, StreamSession, StreamState};
use lc_db::VideoRecord;
use lc_pipeline::NewLiveStream;

use crate::context::AppContext;
use crate::error::AppError;
use crate::middleware::auth::Principal;

/// Largest accepted thumbnail.
pub const MAX_THUMBNAIL_BYTES: usize = 10 * 1024 * 1024;

/// Accepted thumbnail content types and the extension they are stored with.
const THUMBNAIL_TYPES: &[(&str, &str)] = &[
    ("image/jpeg", "jpg"),
    ("image/png", "png"),
    ("image/webp", "webp"),
];

fn parse_key(raw: &str) -> Result<StreamKey, AppError> {
    Ok(raw.parse::<StreamKey>()?)
}

/// Map a terminal session to the control-surface outcome.
///
/// `Failed` and `StoppedUnpersisted` are errors for the caller even though
/// the lifecycle call itself completed.
pub(crate) fn terminal_outcome(session: StreamSession) -> Result<Json<StreamSession>, AppError> {
    let diagnostic = || session.diagnostic.clone().unwrap_or_default();
    match session.state {
        StreamState::Failed => Err(Error::process(&session.stream_key, diagnostic()).into()),
        StreamState::StoppedUnpersisted => Err(Error::upstream(
            lc_pipeline::handoff::METADATA_SERVICE,
            format!(
                "recording for {} was not persisted ({}); retry with persist",
                session.stream_key,
                diagnostic()
            ),
        )
        .into()),
        _ => Ok(Json(session)),
    }
}

/// Thumbnail upload kept on disk for the duration of the request.
struct ThumbnailUpload {
    file: tempfile::NamedTempFile,
}

async fn read_create_form(
    mut multipart: Multipart,
) -> Result<(NewLiveStream, Option<ThumbnailUpload>), AppError> {
    let mut input = NewLiveStream::default();
    let mut thumbnail = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::Validation(format!("invalid multipart body: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "thumbnail" => {
                let content_type = field.content_type().unwrap_or_default().to_string();
                let Some((_, ext)) = THUMBNAIL_TYPES.iter().find(|(ct, _)| *ct == content_type)
                else {
                    return Err(Error::Validation(format!(
                        "Unsupported thumbnail type '{content_type}'; use jpeg, png or webp"
                    ))
                    .into());
                };
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| Error::Validation(format!("invalid thumbnail upload: {e}")))?;
                if data.is_empty() {
                    continue;
                }
                if data.len() > MAX_THUMBNAIL_BYTES {
                    return Err(Error::Validation("Thumbnail exceeds 10 MiB".into()).into());
                }
                let mut file = tempfile::Builder::new()
                    .prefix("thumbnail-")
                    .suffix(&format!(".{ext}"))
                    .tempfile()?;
                file.write_all(&data)?;
                thumbnail = Some(ThumbnailUpload { file });
            }
            other => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| Error::Validation(format!("invalid field '{other}': {e}")))?;
                match other {
                    "title" => input.title = value,
                    "description" => input.description = value,
                    "duration" => input.duration = value,
                    "scheduledAt" | "scheduled_at" => input.scheduled_at = value,
                    _ => tracing::debug!("Ignoring unknown form field '{other}'"),
                }
            }
        }
    }

    Ok((input, thumbnail))
}

/// POST /api/v1/live/stream
#[utoipa::path(
    post,
    path = "/api/v1/live/stream",
    responses(
        (status = 201, description = "Stream scheduled", body = VideoRecord),
        (status = 400, description = "Missing field or thumbnail"),
        (status = 409, description = "A live stream with this title exists"),
        (status = 502, description = "Thumbnail upload failed")
    )
)]
pub async fn create_stream(
    State(ctx): State<AppContext>,
    Extension(principal): Extension<Principal>,
    multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let (input, thumbnail) = read_create_form(multipart).await?;
    let record = ctx
        .lifecycle
        .create(&principal.0, input, thumbnail.as_ref().map(|t| t.file.path()))
        .await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// GET /api/v1/live/streams
#[utoipa::path(
    get,
    path = "/api/v1/live/streams",
    responses(
        (status = 200, description = "Active sessions", body = Vec<StreamSession>)
    )
)]
pub async fn list_streams(State(ctx): State<AppContext>) -> Json<Vec<StreamSession>> {
    Json(ctx.lifecycle.list_active())
}

/// GET /api/v1/live/stream/{key}
#[utoipa::path(
    get,
    path = "/api/v1/live/stream/{key}",
    params(("key" = String, Path, description = "Stream key")),
    responses(
        (status = 200, description = "Session", body = StreamSession),
        (status = 404, description = "Unknown stream")
    )
)]
pub async fn get_stream(
    State(ctx): State<AppContext>,
    Path(key): Path<String>,
) -> Result<Json<StreamSession>, AppError> {
    let key = parse_key(&key)?;
    Ok(Json(ctx.lifecycle.status(&key).await?))
}

/// POST /api/v1/live/stream/{key}/start
#[utoipa::path(
    post,
    path = "/api/v1/live/stream/{key}/start",
    params(("key" = String, Path, description = "Stream key")),
    responses(
        (status = 200, description = "Worker started; session is connecting", body = StreamSession),
        (status = 404, description = "No scheduled stream with this key"),
        (status = 409, description = "Stream is already active or recorded"),
        (status = 500, description = "Worker could not be started")
    )
)]
pub async fn start_stream(
    State(ctx): State<AppContext>,
    Path(key): Path<String>,
) -> Result<Json<StreamSession>, AppError> {
    let key = parse_key(&key)?;
    Ok(Json(ctx.lifecycle.start(&key).await?))
}

/// POST /api/v1/live/stream/{key}/stop
#[utoipa::path(
    post,
    path = "/api/v1/live/stream/{key}/stop",
    params(("key" = String, Path, description = "Stream key")),
    responses(
        (status = 200, description = "Stopped and recording persisted", body = StreamSession),
        (status = 404, description = "Stream was never started"),
        (status = 500, description = "Stream failed"),
        (status = 502, description = "Recording kept locally; persist must be retried")
    )
)]
pub async fn stop_stream(
    State(ctx): State<AppContext>,
    Path(key): Path<String>,
) -> Result<Json<StreamSession>, AppError> {
    let key = parse_key(&key)?;
    terminal_outcome(ctx.lifecycle.stop(&key).await?)
}

/// POST /api/v1/live/stream/{key}/persist
#[utoipa::path(
    post,
    path = "/api/v1/live/stream/{key}/persist",
    params(("key" = String, Path, description = "Stream key")),
    responses(
        (status = 200, description = "Recording persisted", body = StreamSession),
        (status = 409, description = "Stream is not stopped"),
        (status = 502, description = "Handoff failed again")
    )
)]
pub async fn persist_stream(
    State(ctx): State<AppContext>,
    Path(key): Path<String>,
) -> Result<Json<StreamSession>, AppError> {
    let key = parse_key(&key)?;
    terminal_outcome(ctx.lifecycle.persist(&key).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lc_core::StreamDirectories;

    fn session(state: StreamState, diagnostic: Option<&str>) -> StreamSession {
        let key: StreamKey = "abc123".parse().unwrap();
        let mut s = StreamSession::scheduled(key.clone(), &StreamDirectories::new("/m", "/v").resolve(&key));
        s.state = state;
        s.diagnostic = diagnostic.map(String::from);
        s
    }

    #[test]
    fn stopped_is_ok() {
        assert!(terminal_outcome(session(StreamState::Stopped, None)).is_ok());
    }

    #[test]
    fn failed_is_process_error() {
        let err = terminal_outcome(session(StreamState::Failed, Some("no recording produced"))).unwrap_err();
        assert!(matches!(err.inner(), Error::Process { message, .. } if message == "no recording produced"));
    }

    #[test]
    fn unpersisted_is_upstream_error() {
        let err = terminal_outcome(session(StreamState::StoppedUnpersisted, Some("db down"))).unwrap_err();
        assert!(matches!(err.inner(), Error::Upstream { .. }));
        assert!(err.inner().to_string().contains("db down"));
    }
}
