//! # lc-pipeline
//!
//! The stream lifecycle state machine.
//!
//! - **[`StreamLifecycle`]** -- create, start, publish/unpublish, stop,
//!   persist, status; owns the monitor task of every running stream.
//! - **[`SessionRegistry`]** -- active and finished sessions, with per-key
//!   serialization of every state change.
//! - **[`hand_off`]** -- upload a finalized recording and attach it to the
//!   stream's video record.

pub mod handoff;
pub mod lifecycle;
pub mod registry;

#[cfg(test)]
mod test_support;

pub use handoff::hand_off;
pub use lifecycle::{NewLiveStream, PublishSink, StreamLifecycle};
pub use registry::SessionRegistry;
