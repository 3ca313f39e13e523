//! Recording finalization: remux the HLS event playlist into one MP4.

use lc_core::paths::ensure_directory;
use lc_core::playlist::MediaPlaylist;
use lc_core::{Error, RecordingArtifact, Result, StreamKey, StreamPaths};

use crate::command::ToolCommand;
use crate::tools::ToolConfig;

/// Concatenate the stream's segments into `paths.final_output_path`.
///
/// The output is written under a `.partial.mp4` name and renamed into place,
/// so the final path only ever holds a complete file. Fails with `Process`
/// when the stream produced no segments and with `Tool` when the remux
/// itself fails.
pub async fn finalize_recording(
    tool: &ToolConfig,
    key: &StreamKey,
    paths: &StreamPaths,
) -> Result<RecordingArtifact> {
    let segments = MediaPlaylist::read_available(&paths.manifest_path, &paths.dir)
        .await
        .map(|p| p.segments.len())
        .unwrap_or(0);
    if segments == 0 {
        return Err(Error::process(key, "no media was recorded"));
    }

    if let Some(parent) = paths.final_output_path.parent() {
        ensure_directory(parent).await?;
    }
    let partial = paths.final_output_path.with_extension("partial.mp4");

    tracing::info!(
        stream_key = %key,
        segments,
        output = %paths.final_output_path.display(),
        "Finalizing recording"
    );

    let result = ToolCommand::for_tool(tool)
        .args(["-hide_banner", "-loglevel", "error", "-y", "-i"])
        .arg(paths.manifest_path.to_string_lossy())
        .args(["-c", "copy", "-bsf:a", "aac_adtstoasc", "-movflags", "+faststart"])
        .arg(partial.to_string_lossy())
        .execute()
        .await;
    if let Err(e) = result {
        let _ = tokio::fs::remove_file(&partial).await;
        return Err(e);
    }

    tokio::fs::rename(&partial, &paths.final_output_path).await?;
    let size_bytes = tokio::fs::metadata(&paths.final_output_path).await?.len();
    if size_bytes == 0 {
        let _ = tokio::fs::remove_file(&paths.final_output_path).await;
        return Err(Error::process(key, "recording is empty"));
    }

    Ok(RecordingArtifact {
        local_path: paths.final_output_path.clone(),
        size_bytes,
        url: None,
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::test_fixtures::{fake_transcoder, write_segments, FakeBehavior};
    use lc_core::StreamDirectories;

    #[tokio::test]
    async fn remuxes_into_final_path() {
        let tmp = tempfile::tempdir().unwrap();
        let dirs = StreamDirectories::new(tmp.path().join("media"), tmp.path().join("video"));
        let key: StreamKey = "abc123".parse().unwrap();
        let paths = dirs.ensure_stream_dir(&key).await.unwrap();
        write_segments(&paths.dir, 2);

        let tool = fake_transcoder(tmp.path(), FakeBehavior::Segmenting);
        let artifact = finalize_recording(&tool, &key, &paths).await.unwrap();

        assert_eq!(artifact.local_path, tmp.path().join("video").join("abc123.mp4"));
        assert_eq!(artifact.size_bytes, "mp4-recording".len() as u64);
        assert!(artifact.url.is_none());
        assert!(!paths.final_output_path.with_extension("partial.mp4").exists());
    }

    #[tokio::test]
    async fn no_segments_is_process_error() {
        let tmp = tempfile::tempdir().unwrap();
        let dirs = StreamDirectories::new(tmp.path().join("media"), tmp.path().join("video"));
        let key: StreamKey = "empty".parse().unwrap();
        let paths = dirs.ensure_stream_dir(&key).await.unwrap();

        let tool = fake_transcoder(tmp.path(), FakeBehavior::Segmenting);
        let err = finalize_recording(&tool, &key, &paths).await.unwrap_err();
        assert!(matches!(err, Error::Process { .. }));
        assert!(!paths.final_output_path.exists());
    }

    #[tokio::test]
    async fn remux_failure_leaves_no_output() {
        let tmp = tempfile::tempdir().unwrap();
        let dirs = StreamDirectories::new(tmp.path().join("media"), tmp.path().join("video"));
        let key: StreamKey = "broken".parse().unwrap();
        let paths = dirs.ensure_stream_dir(&key).await.unwrap();
        write_segments(&paths.dir, 1);

        let tool = fake_transcoder(tmp.path(), FakeBehavior::Failing);
        let err = finalize_recording(&tool, &key, &paths).await.unwrap_err();
        assert!(matches!(err, Error::Tool { .. }));
        assert!(err.to_string().contains("boom"));
        assert!(!paths.final_output_path.exists());
    }
}
