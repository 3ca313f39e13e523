//! # lc-av
//!
//! External tool management and transcoding for livecast.
//!
//! This crate provides:
//!
//! - **Tool discovery** ([`ToolRegistry`]) -- find and cache the ffmpeg path.
//! - **Command execution** ([`ToolCommand`]) -- async builder with timeout
//!   support for one-shot invocations.
//! - **HLS packaging** ([`HlsSettings`]) -- the live worker's argument list.
//! - **Worker supervision** ([`TranscodeSupervisor`]) -- one long-running
//!   worker per stream key, fed from a publisher and watched for segments.
//! - **Recording finalization** ([`finalize_recording`]) -- remux a finished
//!   stream into a single MP4.

pub mod command;
pub mod hls;
pub mod recording;
pub mod supervisor;
pub mod tools;

#[cfg(all(unix, any(test, feature = "test-support")))]
pub mod test_fixtures;

// ---- Re-exports for convenience ----

pub use command::{ToolCommand, ToolOutput};
pub use hls::HlsSettings;
pub use recording::finalize_recording;
pub use supervisor::{TranscodeSupervisor, WorkerPhase, WorkerStatus};
pub use tools::{ToolConfig, ToolInfo, ToolRegistry};
