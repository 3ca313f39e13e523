//! Stream directory management.
//!
//! [`StreamDirectories`] is the single authority that maps a [`StreamKey`]
//! to on-disk locations. Every other component (supervisor, playback,
//! recording finalization) resolves paths through it instead of composing
//! strings on its own.

use std::io;
use std::path::{Path, PathBuf};

use crate::ids::StreamKey;
use crate::Result;

/// Name of the playlist the worker writes in each stream directory.
pub const MANIFEST_FILE: &str = "index.m3u8";

/// Resolved locations for one stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamPaths {
    /// `{media_root}/{key}`: segments and manifest live here.
    pub dir: PathBuf,
    /// `{media_root}/{key}/index.m3u8`.
    pub manifest_path: PathBuf,
    /// `{output_root}/{key}.mp4`: the finalized recording.
    pub final_output_path: PathBuf,
}

/// Maps stream keys to directories under the configured roots.
#[derive(Debug, Clone)]
pub struct StreamDirectories {
    media_root: PathBuf,
    output_root: PathBuf,
}

impl StreamDirectories {
    pub fn new(media_root: impl Into<PathBuf>, output_root: impl Into<PathBuf>) -> Self {
        Self {
            media_root: media_root.into(),
            output_root: output_root.into(),
        }
    }

    pub fn media_root(&self) -> &Path {
        &self.media_root
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    /// Compute the paths for `key`. Pure: touches nothing on disk.
    pub fn resolve(&self, key: &StreamKey) -> StreamPaths {
        let dir = self.media_root.join(key.as_str());
        StreamPaths {
            manifest_path: dir.join(MANIFEST_FILE),
            final_output_path: self.output_root.join(format!("{key}.mp4")),
            dir,
        }
    }

    /// Resolve a playback file inside the stream directory.
    ///
    /// Returns `None` for names that could escape the directory or that
    /// refer to files still being written (`*.tmp`).
    pub fn segment_path(&self, key: &StreamKey, file: &str) -> Option<PathBuf> {
        if !is_servable_file_name(file) {
            return None;
        }
        Some(self.media_root.join(key.as_str()).join(file))
    }

    /// Make sure both roots exist.
    pub async fn ensure_roots(&self) -> Result<()> {
        ensure_directory(&self.media_root).await?;
        ensure_directory(&self.output_root).await
    }

    /// Create the stream directory for `key` if needed and return its paths.
    pub async fn ensure_stream_dir(&self, key: &StreamKey) -> Result<StreamPaths> {
        let paths = self.resolve(key);
        ensure_directory(&paths.dir).await?;
        Ok(paths)
    }
}

/// Create `path` (and parents) if missing.
///
/// Idempotent: an existing directory and its contents are left untouched.
/// Fails with an IO error when the path exists as a non-directory or is a
/// read-only directory.
pub async fn ensure_directory(path: &Path) -> Result<()> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_dir() => {
            if meta.permissions().readonly() {
                return Err(io::Error::new(
                    io::ErrorKind::PermissionDenied,
                    format!("{} is not writable", path.display()),
                )
                .into());
            }
            Ok(())
        }
        Ok(_) => Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{} exists and is not a directory", path.display()),
        )
        .into()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            tokio::fs::create_dir_all(path).await?;
            tracing::debug!(path = %path.display(), "Created directory");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn is_servable_file_name(file: &str) -> bool {
    !(file.is_empty()
        || file.contains('/')
        || file.contains('\\')
        || file.contains("..")
        || file.starts_with('.')
        || file.ends_with(".tmp"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> StreamKey {
        s.parse().unwrap()
    }

    #[test]
    fn resolve_is_deterministic() {
        let dirs = StreamDirectories::new("/srv/media", "/srv/video");
        let paths = dirs.resolve(&key("abc123"));
        assert_eq!(paths.dir, PathBuf::from("/srv/media/abc123"));
        assert_eq!(paths.manifest_path, PathBuf::from("/srv/media/abc123/index.m3u8"));
        assert_eq!(paths.final_output_path, PathBuf::from("/srv/video/abc123.mp4"));
        assert_eq!(paths, dirs.resolve(&key("abc123")));
    }

    #[test]
    fn segment_path_rejects_traversal() {
        let dirs = StreamDirectories::new("/srv/media", "/srv/video");
        let k = key("abc123");
        assert_eq!(
            dirs.segment_path(&k, "index0.ts"),
            Some(PathBuf::from("/srv/media/abc123/index0.ts"))
        );
        for bad in ["../secret", "a/b.ts", "a\\b.ts", ".hidden", "", "index3.ts.tmp"] {
            assert_eq!(dirs.segment_path(&k, bad), None, "{bad:?} accepted");
        }
    }

    #[tokio::test]
    async fn ensure_directory_is_idempotent_and_preserves_contents() {
        let tmp = tempfile::tempdir().unwrap();
        let dirs = StreamDirectories::new(tmp.path().join("media"), tmp.path().join("video"));
        let k = key("abc123");

        let paths = dirs.ensure_stream_dir(&k).await.unwrap();
        assert!(paths.dir.is_dir());
        std::fs::write(paths.dir.join("index0.ts"), b"segment").unwrap();

        dirs.ensure_stream_dir(&k).await.unwrap();
        assert_eq!(std::fs::read(paths.dir.join("index0.ts")).unwrap(), b"segment");
    }

    #[tokio::test]
    async fn ensure_directory_fails_on_file() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("taken");
        std::fs::write(&file, b"x").unwrap();
        let err = ensure_directory(&file).await.unwrap_err();
        assert!(matches!(err, crate::Error::Io { .. }));
    }

    #[tokio::test]
    async fn ensure_roots_creates_both() {
        let tmp = tempfile::tempdir().unwrap();
        let dirs = StreamDirectories::new(tmp.path().join("m"), tmp.path().join("v"));
        dirs.ensure_roots().await.unwrap();
        assert!(dirs.media_root().is_dir());
        assert!(dirs.output_root().is_dir());
    }
}
