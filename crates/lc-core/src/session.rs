//! Stream session state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::ids::StreamKey;
use crate::paths::StreamPaths;
use crate::{Error, Result};

/// Lifecycle state of a live stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum StreamState {
    Scheduled,
    Connecting,
    Live,
    Stopping,
    Stopped,
    /// Media finalized locally but the handoff to storage or metadata failed.
    StoppedUnpersisted,
    Failed,
}

impl StreamState {
    /// States that own a worker process and block a new start.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            StreamState::Connecting | StreamState::Live | StreamState::Stopping
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StreamState::Stopped | StreamState::StoppedUnpersisted | StreamState::Failed
        )
    }

    /// Whether `self -> next` is an edge of the lifecycle.
    pub fn can_transition_to(self, next: StreamState) -> bool {
        use StreamState::*;
        matches!(
            (self, next),
            (Scheduled, Connecting)
                | (Scheduled, Failed)
                | (Connecting, Live)
                | (Connecting, Stopping)
                | (Connecting, Failed)
                | (Live, Stopping)
                | (Live, Failed)
                | (Stopping, Stopped)
                | (Stopping, StoppedUnpersisted)
                | (Stopping, Failed)
                | (StoppedUnpersisted, Stopped)
                | (Failed, Connecting)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StreamState::Scheduled => "scheduled",
            StreamState::Connecting => "connecting",
            StreamState::Live => "live",
            StreamState::Stopping => "stopping",
            StreamState::Stopped => "stopped",
            StreamState::StoppedUnpersisted => "stopped_unpersisted",
            StreamState::Failed => "failed",
        }
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The finalized single-file recording of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct RecordingArtifact {
    #[schema(value_type = String)]
    pub local_path: PathBuf,
    pub size_bytes: u64,
    /// Set once the recording has been uploaded.
    pub url: Option<String>,
}

/// One live stream from scheduling through its terminal state.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct StreamSession {
    pub stream_key: StreamKey,
    pub state: StreamState,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    #[schema(value_type = String)]
    pub output_directory: PathBuf,
    #[schema(value_type = String)]
    pub manifest_path: PathBuf,
    /// Segments observed on disk so far.
    pub segments: usize,
    /// Last failure description (worker stderr, handoff error).
    pub diagnostic: Option<String>,
    pub artifact: Option<RecordingArtifact>,
}

impl StreamSession {
    /// A session that exists only as a scheduled record.
    pub fn scheduled(key: StreamKey, paths: &StreamPaths) -> Self {
        Self {
            stream_key: key,
            state: StreamState::Scheduled,
            started_at: None,
            ended_at: None,
            output_directory: paths.dir.clone(),
            manifest_path: paths.manifest_path.clone(),
            segments: 0,
            diagnostic: None,
            artifact: None,
        }
    }

    /// Move to `next`, stamping start and end times.
    ///
    /// Rejects edges the lifecycle does not allow.
    pub fn transition(&mut self, next: StreamState) -> Result<StreamState> {
        let from = self.state;
        if !from.can_transition_to(next) {
            return Err(Error::Internal(format!(
                "illegal transition {from} -> {next} for stream {}",
                self.stream_key
            )));
        }
        if next == StreamState::Connecting {
            self.started_at = Some(Utc::now());
            self.ended_at = None;
            self.diagnostic = None;
            self.segments = 0;
        }
        if next.is_terminal() && self.ended_at.is_none() {
            self.ended_at = Some(Utc::now());
        }
        self.state = next;
        Ok(from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths::StreamDirectories;

    fn session() -> StreamSession {
        let dirs = StreamDirectories::new("/m", "/v");
        let key: StreamKey = "abc123".parse().unwrap();
        let paths = dirs.resolve(&key);
        StreamSession::scheduled(key, &paths)
    }

    #[test]
    fn happy_path_transitions() {
        let mut s = session();
        s.transition(StreamState::Connecting).unwrap();
        assert!(s.started_at.is_some());
        s.transition(StreamState::Live).unwrap();
        s.transition(StreamState::Stopping).unwrap();
        assert!(s.ended_at.is_none());
        s.transition(StreamState::Stopped).unwrap();
        assert!(s.ended_at.is_some());
    }

    #[test]
    fn stopped_is_final() {
        let mut s = session();
        s.transition(StreamState::Connecting).unwrap();
        s.transition(StreamState::Stopping).unwrap();
        s.transition(StreamState::Stopped).unwrap();
        for next in [StreamState::Connecting, StreamState::Live, StreamState::Failed] {
            assert!(s.clone().transition(next).is_err());
        }
    }

    #[test]
    fn cannot_skip_stopping() {
        let mut s = session();
        s.transition(StreamState::Connecting).unwrap();
        s.transition(StreamState::Live).unwrap();
        let err = s.transition(StreamState::Stopped).unwrap_err();
        assert!(err.to_string().contains("live -> stopped"));
        assert_eq!(s.state, StreamState::Live);
    }

    #[test]
    fn failed_may_restart_and_resets_diagnostic() {
        let mut s = session();
        s.transition(StreamState::Connecting).unwrap();
        s.diagnostic = Some("boom".into());
        s.transition(StreamState::Failed).unwrap();
        s.transition(StreamState::Connecting).unwrap();
        assert!(s.diagnostic.is_none());
        assert!(s.ended_at.is_none());
    }

    #[test]
    fn unpersisted_can_be_persisted() {
        assert!(StreamState::StoppedUnpersisted.can_transition_to(StreamState::Stopped));
        assert!(StreamState::StoppedUnpersisted.is_terminal());
        assert!(!StreamState::StoppedUnpersisted.is_active());
    }

    #[test]
    fn active_states() {
        assert!(StreamState::Connecting.is_active());
        assert!(StreamState::Live.is_active());
        assert!(StreamState::Stopping.is_active());
        assert!(!StreamState::Scheduled.is_active());
        assert_eq!(
            serde_json::to_string(&StreamState::StoppedUnpersisted).unwrap(),
            "\"stopped_unpersisted\""
        );
    }
}
