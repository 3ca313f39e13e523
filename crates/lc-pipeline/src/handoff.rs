//! Recording handoff: upload the finalized file and attach it to the
//! stream's video record.

use lc_core::{ChannelId, Error, RecordingArtifact, Result, StreamKey};
use lc_db::{MetadataStore, VideoPatch, VideoRecord};
use lc_storage::ObjectStorage;

/// Service name for metadata-store failures.
pub const METADATA_SERVICE: &str = "metadata-store";

/// Upload `artifact` (unless an earlier attempt already did) and record its
/// URL on the video. Every failure is reported as `Upstream`.
///
/// The uploaded URL is stored in `artifact` before the metadata update, so a
/// retry after a failed update does not upload a second copy.
pub async fn hand_off(
    store: &dyn MetadataStore,
    storage: &dyn ObjectStorage,
    key: &StreamKey,
    owner: &ChannelId,
    artifact: &mut RecordingArtifact,
) -> Result<VideoRecord> {
    let url = match &artifact.url {
        Some(url) => url.clone(),
        None => {
            let stored = storage.upload(&artifact.local_path).await.map_err(as_upstream(
                lc_storage::SERVICE,
            ))?;
            tracing::debug!(stream_key = %key, url = %stored.url, "Recording uploaded");
            artifact.url = Some(stored.url.clone());
            stored.url
        }
    };

    let patch = VideoPatch {
        video_file: Some(url),
        channel_id: Some(owner.clone()),
        ..VideoPatch::default()
    };
    match store.find_by_id_and_update(key, &patch).await {
        Ok(Some(record)) => Ok(record),
        Ok(None) => Err(Error::upstream(
            METADATA_SERVICE,
            format!("video record {key} no longer exists"),
        )),
        Err(e) => Err(as_upstream(METADATA_SERVICE)(e)),
    }
}

fn as_upstream(service: &'static str) -> impl Fn(Error) -> Error {
    move |e| match e {
        e @ Error::Upstream { .. } => e,
        other => Error::upstream(service, other.to_string()),
    }
}
