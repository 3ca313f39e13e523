//! External tool detection.
//!
//! The [`ToolRegistry`] discovers and caches the location of the ffmpeg
//! binary used for live packaging and recording finalization.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default one-shot tool timeout: 30 minutes (remuxing long recordings).
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1800);

/// Known tool names that the registry manages.
const KNOWN_TOOLS: &[&str] = &["ffmpeg"];

/// Configuration for a single external tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    /// Human-readable tool name (e.g. "ffmpeg").
    pub name: String,
    /// Resolved path to the executable.
    pub path: PathBuf,
    /// Arguments placed before any generated ones, for wrappers such as
    /// `nice -n 10 ffmpeg` or an interpreter running a script.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prefix_args: Vec<String>,
    /// Maximum execution time for one-shot invocations.
    #[serde(default = "default_timeout", with = "duration_secs")]
    pub timeout: Duration,
}

impl ToolConfig {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            prefix_args: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

/// Serde helpers to (de)serialize `Duration` as whole seconds.
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}

/// Availability information for a tool, returned by [`ToolRegistry::check_all`].
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ToolInfo {
    pub name: String,
    pub available: bool,
    /// First line of the tool's version output.
    pub version: Option<String>,
    #[schema(value_type = Option<String>)]
    pub path: Option<PathBuf>,
}

/// Registry holding discovered tool configurations.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, ToolConfig>,
}

impl ToolRegistry {
    /// Discover tools by searching `PATH` (or using overrides from config).
    ///
    /// A configured path is used when it exists; otherwise [`which::which`]
    /// looks the tool up in `PATH`. Tools that are not found are omitted.
    pub fn discover(tools_config: &lc_core::config::ToolsConfig) -> Self {
        let mut tools = HashMap::new();

        for &name in KNOWN_TOOLS {
            let custom_path = match name {
                "ffmpeg" => tools_config.ffmpeg_path.as_deref(),
                _ => None,
            };

            let resolved = match custom_path {
                Some(p) if p.exists() => Some(p.to_path_buf()),
                Some(p) => {
                    tracing::warn!("Configured {name} path {} does not exist; searching PATH", p.display());
                    which::which(name).ok()
                }
                None => which::which(name).ok(),
            };

            if let Some(path) = resolved {
                tools.insert(name.to_string(), ToolConfig::new(name, path));
            }
        }

        Self { tools }
    }

    /// Register (or replace) a tool explicitly.
    pub fn with_tool(mut self, tool: ToolConfig) -> Self {
        self.tools.insert(tool.name.clone(), tool);
        self
    }

    /// Return the [`ToolConfig`] for `name`, or [`lc_core::Error::Tool`] if
    /// it was not found during discovery.
    pub fn require(&self, name: &str) -> lc_core::Result<&ToolConfig> {
        self.tools.get(name).ok_or_else(|| {
            lc_core::Error::tool(name, format!("{name} not found; is it installed and in PATH?"))
        })
    }

    /// Check all known tools and return availability information.
    pub fn check_all(&self) -> Vec<ToolInfo> {
        KNOWN_TOOLS
            .iter()
            .map(|&name| match self.tools.get(name) {
                Some(cfg) => ToolInfo {
                    name: name.to_string(),
                    available: true,
                    version: detect_version(&cfg.path),
                    path: Some(cfg.path.clone()),
                },
                None => ToolInfo {
                    name: name.to_string(),
                    available: false,
                    version: None,
                    path: None,
                },
            })
            .collect()
    }
}

/// Run `<tool> -version` and return the first line of stdout.
fn detect_version(path: &Path) -> Option<String> {
    let output = std::process::Command::new(path).arg("-version").output().ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lc_core::config::ToolsConfig;

    #[test]
    fn discover_with_default_config() {
        let registry = ToolRegistry::discover(&ToolsConfig::default());
        let infos = registry.check_all();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].name, "ffmpeg");
    }

    #[test]
    fn require_missing_tool_returns_error() {
        let registry = ToolRegistry::default();
        let err = registry.require("ffmpeg").unwrap_err();
        assert!(matches!(err, lc_core::Error::Tool { .. }));
    }

    #[test]
    fn with_tool_overrides_discovery() {
        let registry = ToolRegistry::default().with_tool(ToolConfig::new("ffmpeg", "/opt/ffmpeg"));
        assert_eq!(registry.require("ffmpeg").unwrap().path, PathBuf::from("/opt/ffmpeg"));
    }

    #[test]
    fn tool_config_serialization() {
        let cfg = ToolConfig::new("ffmpeg", "/usr/bin/ffmpeg");
        let json = serde_json::to_string(&cfg).unwrap();
        assert!(!json.contains("prefix_args"));
        let back: ToolConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.timeout, DEFAULT_TIMEOUT);
        assert_eq!(back.name, "ffmpeg");
    }
}
