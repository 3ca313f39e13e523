//! Application configuration types.
//!
//! The top-level [`Config`] struct is deserialized from JSON and carries the
//! sub-configs for the HTTP server, the ingest listener, media directories,
//! auth, object storage and external tools. Every section defaults sensibly
//! so a completely empty `{}` file is valid.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;
use crate::Error;

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub ingest: IngestConfig,
    pub media: MediaConfig,
    pub auth: AuthConfig,
    pub storage: StorageConfig,
    pub tools: ToolsConfig,
}

impl Config {
    /// Deserialize a `Config` from a JSON string.
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str)
            .map_err(|e| Error::Validation(format!("config parse error: {e}")))
    }

    /// Load and parse a config file, failing on any error.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Load configuration from a file path, falling back to defaults if the
    /// path is `None` or the file does not exist.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_json(&contents).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse config file {}: {e}", path.display());
                Self::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config file at {}; using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.server.port == 0 {
            warnings.push("server.port is 0; a random port will be assigned".into());
        }

        let ports = [
            ("server.port", self.server.port),
            ("ingest.port", self.ingest.port),
            ("ingest.control_port", self.ingest.control_port),
        ];
        for (i, (name_a, a)) in ports.iter().enumerate() {
            for (name_b, b) in &ports[i + 1..] {
                if *a != 0 && a == b {
                    warnings.push(format!("{name_a} and {name_b} are both {a}"));
                }
            }
        }

        if self.ingest.app_name.is_empty() || self.ingest.app_name.contains('/') {
            warnings.push(format!(
                "ingest.app_name '{}' is not a single path segment; no RTMP publish will match",
                self.ingest.app_name
            ));
        }

        if self.auth.enabled && self.auth.api_key.is_none() && self.auth.tokens.is_empty() {
            warnings.push("auth is enabled but neither api_key nor tokens are set".into());
        }

        if self.media.segment_duration_secs == 0 {
            warnings.push("media.segment_duration_secs is 0; ffmpeg will pick its default".into());
        }

        if self.media.media_root == self.media.output_root {
            warnings.push(
                "media.media_root and media.output_root are the same directory".into(),
            );
        }

        if self.media.poll_interval_ms < 50 {
            warnings.push(format!(
                "media.poll_interval_ms {} is very low; manifests will be polled aggressively",
                self.media.poll_interval_ms
            ));
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// HTTP server settings (control API and playback).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3001,
            db_path: PathBuf::from("./data/livecast.db"),
        }
    }
}

/// Ingest listener settings: the publish port and its companion control port.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub host: String,
    /// RTMP publish port.
    pub port: u16,
    /// Health, publisher list and HTTP push.
    pub control_port: u16,
    /// RTMP application publishers must use (`rtmp://host/{app_name}/{key}`).
    pub app_name: String,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 1935,
            control_port: 8000,
            app_name: "live".into(),
        }
    }
}

/// Media directories and transcoding parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Root under which each stream gets `{media_root}/{key}/`.
    pub media_root: PathBuf,
    /// Directory receiving finalized `{key}.mp4` recordings.
    pub output_root: PathBuf,
    #[serde(default = "default_segment_duration")]
    pub segment_duration_secs: u32,
    #[serde(default = "default_audio_codec")]
    pub audio_codec: String,
    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate: String,
    /// Container format of published bytes (`flv`, `mpegts`); `None` lets ffmpeg probe.
    pub input_format: Option<String>,
    #[serde(default = "default_stop_grace")]
    pub stop_grace_secs: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

fn default_segment_duration() -> u32 {
    25
}

fn default_audio_codec() -> String {
    "aac".into()
}

fn default_audio_bitrate() -> String {
    "128k".into()
}

fn default_stop_grace() -> u64 {
    10
}

fn default_poll_interval() -> u64 {
    500
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            media_root: PathBuf::from("./public/media"),
            output_root: PathBuf::from("./public/video"),
            segment_duration_secs: default_segment_duration(),
            audio_codec: default_audio_codec(),
            audio_bitrate: default_audio_bitrate(),
            input_format: None,
            stop_grace_secs: default_stop_grace(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

impl MediaConfig {
    /// Grace period given to a worker between closing its input and killing it.
    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }

    /// Interval at which worker manifests are polled for new segments.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Authentication settings for the control API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub enabled: bool,
    /// Administrative key; resolves to the `admin` channel.
    pub api_key: Option<String>,
    /// Access token to channel id.
    pub tokens: HashMap<String, String>,
}

/// Local object storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub root: PathBuf,
    /// URL prefix under which stored objects are reachable.
    pub public_base_url: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./data/uploads"),
            public_base_url: "/uploads".into(),
        }
    }
}

/// Override paths for external tools.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub ffmpeg_path: Option<PathBuf>,
}
