//! lc-storage: object storage for thumbnails and finished recordings.
//!
//! [`ObjectStorage`] is the seam the lifecycle uploads through.
//! [`LocalObjectStorage`] keeps objects in a directory that the HTTP server
//! exposes under a public URL prefix.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use lc_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Service name used in upstream errors.
pub const SERVICE: &str = "object-storage";

/// Result of a successful upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredObject {
    /// Public URL of the object.
    pub url: String,
    pub size_bytes: u64,
}

/// Remote (or remote-like) object storage.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Upload the file at `local_path`, returning where it can be fetched.
    async fn upload(&self, local_path: &Path) -> Result<StoredObject>;

    /// Remove a previously uploaded object. Returns `false` if it was not found.
    async fn delete(&self, url: &str) -> Result<bool>;
}

/// Stores objects as files under `root`, named by a random id plus the
/// source extension.
#[derive(Debug, Clone)]
pub struct LocalObjectStorage {
    root: PathBuf,
    public_base_url: String,
}

impl LocalObjectStorage {
    pub fn new(root: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a public URL back to a file under `root`.
    fn object_path(&self, url: &str) -> Option<PathBuf> {
        let name = url.strip_prefix(&self.public_base_url)?.strip_prefix('/')?;
        if name.is_empty() || name.contains('/') || name.contains('\\') || name.contains("..") {
            return None;
        }
        Some(self.root.join(name))
    }
}

#[async_trait]
impl ObjectStorage for LocalObjectStorage {
    async fn upload(&self, local_path: &Path) -> Result<StoredObject> {
        let upstream = |e: std::io::Error| {
            Error::upstream(SERVICE, format!("upload of {} failed: {e}", local_path.display()))
        };

        tokio::fs::create_dir_all(&self.root).await.map_err(upstream)?;

        let name = match local_path.extension().and_then(|e| e.to_str()) {
            Some(ext) => format!("{}.{ext}", uuid::Uuid::new_v4().simple()),
            None => uuid::Uuid::new_v4().simple().to_string(),
        };
        let dest = self.root.join(&name);
        let size_bytes = tokio::fs::copy(local_path, &dest).await.map_err(upstream)?;

        let url = format!("{}/{name}", self.public_base_url);
        tracing::debug!(source = %local_path.display(), %url, size_bytes, "Stored object");
        Ok(StoredObject { url, size_bytes })
    }

    async fn delete(&self, url: &str) -> Result<bool> {
        let Some(path) = self.object_path(url) else {
            return Ok(false);
        };
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::upstream(SERVICE, format!("delete of {url} failed: {e}"))),
        }
    }
}
