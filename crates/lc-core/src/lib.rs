//! lc-core: shared types, errors, configuration, and the event system.
//!
//! This crate is the foundational dependency for all other lc-* crates. It
//! owns the stream key type, the unified error, the stream directory
//! manager, the HLS manifest model and the session state machine types.

pub mod config;
pub mod error;
pub mod events;
pub mod ids;
pub mod paths;
pub mod playlist;
pub mod session;

// Re-export the most commonly used items at the crate root.
pub use error::{Error, Result};
pub use ids::{ChannelId, StreamKey};
pub use paths::{StreamDirectories, StreamPaths};
pub use session::{RecordingArtifact, StreamSession, StreamState};
